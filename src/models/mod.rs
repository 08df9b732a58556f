//! Typed entities exchanged with the judge API

pub mod job;
pub mod problem;
pub mod verdict;

pub use job::{ExecutionResult, Job, JobPayload};
pub use problem::{Problem, ProblemPayload};
pub use verdict::JobVerdict;
