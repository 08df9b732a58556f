//! Evaluator - turns a leased job into a sequence of execution results
//!
//! The worker loop only forwards what an evaluator yields. Partial-result
//! cadence is decided here, by `PartialSubmitPolicy`.

pub mod compiler;
pub mod confine;
pub mod judge;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::models::{ExecutionResult, Job};

pub use judge::ConfineEvaluator;

/// Produces the results for one job.
///
/// The returned receiver yields zero or more partial results followed by one
/// terminal result, then closes. Dropping it abandons the evaluation.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, job: Arc<Job>) -> mpsc::Receiver<ExecutionResult>;
}

/// Thresholds governing how often partial results are emitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialSubmitPolicy {
    /// Emit once more than this much time passed since the last emission
    pub time_threshold: Duration,
    /// Emit once more than this many cases ran since the last emission
    pub cases_threshold: u32,
}

/// Tracks the last partial emission for one job
#[derive(Debug)]
pub struct PartialThrottle {
    policy: PartialSubmitPolicy,
    last_emitted_at: Instant,
    last_emitted_case: u32,
}

impl PartialThrottle {
    pub fn new(policy: PartialSubmitPolicy) -> Self {
        Self {
            policy,
            last_emitted_at: Instant::now(),
            last_emitted_case: 0,
        }
    }

    /// Whether a partial result should follow the accepted case `case` of `total`.
    /// The last case never emits a partial; the terminal result covers it.
    pub fn should_emit(&self, case: u32, total: u32) -> bool {
        if case >= total {
            return false;
        }
        self.last_emitted_at.elapsed() > self.policy.time_threshold
            || case - self.last_emitted_case > self.policy.cases_threshold
    }

    pub fn mark(&mut self, case: u32) {
        self.last_emitted_at = Instant::now();
        self.last_emitted_case = case;
    }
}
