use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal outcome of a judged job, encoded with the coordinator's short codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobVerdict {
    #[serde(rename = "AC")]
    Accepted,
    #[serde(rename = "RAN")]
    Ran,
    #[serde(rename = "IS")]
    InvalidSource,
    #[serde(rename = "WA")]
    WrongAnswer,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "RTE")]
    RuntimeError,
    #[serde(rename = "ISC")]
    IllegalSyscall,
    #[serde(rename = "CE")]
    CompilationError,
    #[serde(rename = "JE")]
    JudgeError,
}

impl JobVerdict {
    /// Wire code sent in the `verdict` field of a submission
    pub fn code(&self) -> &'static str {
        match self {
            JobVerdict::Accepted => "AC",
            JobVerdict::Ran => "RAN",
            JobVerdict::InvalidSource => "IS",
            JobVerdict::WrongAnswer => "WA",
            JobVerdict::TimeLimitExceeded => "TLE",
            JobVerdict::MemoryLimitExceeded => "MLE",
            JobVerdict::RuntimeError => "RTE",
            JobVerdict::IllegalSyscall => "ISC",
            JobVerdict::CompilationError => "CE",
            JobVerdict::JudgeError => "JE",
        }
    }
}

impl fmt::Display for JobVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
