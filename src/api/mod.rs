//! Judge API client
//!
//! This module owns every interaction with the coordinator:
//! - Transport with connection retry (`transport`)
//! - Problem cache with conditional refresh (`problems`)
//! - Job claim, release and result submission (`jobs`)

pub mod jobs;
pub mod problems;
pub mod transport;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::languages::LanguageTable;

use problems::ProblemCache;
pub use transport::{ApiClient, HttpTransport, RetryPolicy, Transport};

/// Centralized judge API handle shared by the worker loop and the shutdown path
pub struct JudgeApi<T: Transport = HttpTransport> {
    client: ApiClient<T>,
    problems: ProblemCache,
    languages: Arc<LanguageTable>,
}

impl JudgeApi<HttpTransport> {
    pub fn from_config(config: &WorkerConfig, languages: Arc<LanguageTable>) -> Self {
        let transport = HttpTransport::new(&config.judge_url);
        let client = ApiClient::new(
            transport,
            &config.api_key,
            RetryPolicy::every(config.retry_freq_secs),
        );
        Self::new(client, languages)
    }
}

impl<T: Transport> JudgeApi<T> {
    pub fn new(client: ApiClient<T>, languages: Arc<LanguageTable>) -> Self {
        Self {
            client,
            problems: ProblemCache::new(languages.clone()),
            languages,
        }
    }

    pub fn problems(&self) -> &ProblemCache {
        &self.problems
    }

    /// Bulk-load every problem; used once at startup
    pub async fn refresh_problems(&self) -> bool {
        self.problems.refresh_all(&self.client).await
    }

    pub async fn ensure_problem(&self, problem_id: i64) -> bool {
        self.problems.ensure(&self.client, problem_id).await
    }
}
