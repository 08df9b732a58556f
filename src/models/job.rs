use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::languages::LanguageConfig;
use crate::models::{JobVerdict, Problem};

/// Job body as returned by `POST /jobs/claim`
#[derive(Debug, Clone, Deserialize)]
pub struct JobPayload {
    pub id: i64,
    #[serde(default)]
    pub problem_id: Option<i64>,
    #[serde(deserialize_with = "opaque_token")]
    pub verification_code: String,
    #[serde(default)]
    pub code: String,
    pub language: String,
}

/// A leased job with its problem and language resolved
#[derive(Debug)]
pub struct Job {
    pub id: i64,
    /// Capability token proving this worker holds the lease
    pub verification_code: String,
    pub problem: Option<Arc<Problem>>,
    pub code: String,
    pub language: Arc<LanguageConfig>,
}

/// One reported outcome for a job; partial while `verdict` is `None`
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub job: Arc<Job>,
    pub verdict: Option<JobVerdict>,
    pub last_ran_case: u32,
    /// Seconds
    pub execution_time: f64,
    pub execution_memory: i64,
}

impl ExecutionResult {
    /// Fresh result for `job` with no cases run yet
    pub fn new(job: Arc<Job>, verdict: Option<JobVerdict>) -> Self {
        Self {
            job,
            verdict,
            last_ran_case: 0,
            execution_time: 0.0,
            execution_memory: 0,
        }
    }
}

/// Verification codes are opaque; accept them as JSON strings or numbers
fn opaque_token<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Token {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Token::deserialize(deserializer)? {
        Token::Text(text) => text,
        Token::Number(number) => number.to_string(),
    })
}
