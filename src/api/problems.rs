//! Read-through cache of problem definitions
//!
//! Entries are refreshed with conditional fetches: a cached problem's
//! `last_modified` is sent as `If-Modified-Since` and a 304 keeps it as-is.
//! Entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::transport::{ApiClient, ApiResponse, Transport};
use crate::error::ApiError;
use crate::languages::LanguageTable;
use crate::models::{Problem, ProblemPayload};

pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

pub struct ProblemCache {
    languages: Arc<LanguageTable>,
    problems: RwLock<HashMap<i64, Arc<Problem>>>,
}

impl ProblemCache {
    pub fn new(languages: Arc<LanguageTable>) -> Self {
        Self {
            languages,
            problems: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, problem_id: i64) -> Option<Arc<Problem>> {
        self.problems.read().await.get(&problem_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.problems.read().await.len()
    }

    /// Make sure an up-to-date copy of `problem_id` is cached.
    ///
    /// Returns false when the problem is currently unusable; an existing entry
    /// is left in place in that case.
    pub async fn ensure<T: Transport>(&self, client: &ApiClient<T>, problem_id: i64) -> bool {
        let since = self
            .get(problem_id)
            .await
            .map(|problem| problem.last_modified.to_string());
        let headers: Vec<(&str, &str)> = since
            .iter()
            .map(|value| (IF_MODIFIED_SINCE, value.as_str()))
            .collect();

        let path = format!("/problems/{}", problem_id);
        let Some(response) = client.get(&path, &headers, client.default_retry()).await else {
            warn!("No response while fetching problem {}", problem_id);
            return false;
        };

        match response.status {
            200 => match self.store(&response, problem_id).await {
                Ok(()) => {
                    info!("Got problem {}.", problem_id);
                    true
                }
                Err(e) => {
                    error!("Problem {} is unusable: {}", problem_id, e);
                    false
                }
            },
            304 => {
                debug!("Problem {} not modified", problem_id);
                true
            }
            status => {
                warn!(
                    "Failed to fetch problem {}: unexpected status {}",
                    problem_id, status
                );
                false
            }
        }
    }

    /// Fetch the full problem list and merge it into the cache.
    ///
    /// Malformed problems and problems naming an unknown language are skipped.
    /// Returns whether the list itself could be fetched.
    pub async fn refresh_all<T: Transport>(&self, client: &ApiClient<T>) -> bool {
        info!("Refreshing problems...");

        let Some(response) = client.get("/problems", &[], client.default_retry()).await else {
            warn!("No response while refreshing problems");
            return false;
        };
        if response.status != 200 {
            warn!(
                "Failed to refresh problems: unexpected status {}",
                response.status
            );
            return false;
        }

        let entries: Vec<serde_json::Value> = match response.json() {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to parse problem list: {}", e);
                return false;
            }
        };

        let mut refreshed = 0usize;
        let mut problems = self.problems.write().await;
        for entry in entries {
            let payload: ProblemPayload = match serde_json::from_value(entry) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping malformed problem in problem list: {}", e);
                    continue;
                }
            };
            let Some(id) = payload.id else {
                warn!("Skipping problem without id in problem list");
                continue;
            };
            match Problem::resolve(payload, id, &self.languages) {
                Ok(problem) => {
                    problems.insert(id, Arc::new(problem));
                    refreshed += 1;
                }
                Err(e) => warn!("Skipping problem {}: {}", id, e),
            }
        }

        info!("Refreshed {} problems", refreshed);
        true
    }

    async fn store(&self, response: &ApiResponse, problem_id: i64) -> Result<(), ApiError> {
        let payload: ProblemPayload = response.json()?;
        let problem = Problem::resolve(payload, problem_id, &self.languages)?;

        self.problems
            .write()
            .await
            .insert(problem_id, Arc::new(problem));
        Ok(())
    }
}
