//! Job leasing and result reporting

use serde_json::json;
use tracing::{debug, error, warn};

use super::transport::{RetryPolicy, Transport};
use super::JudgeApi;
use crate::models::{ExecutionResult, Job, JobPayload};

impl<T: Transport> JudgeApi<T> {
    /// Lease the next job from the coordinator.
    ///
    /// Returns `None` when the queue is empty, the coordinator is unreachable,
    /// or the job cannot be processed (unusable problem, unknown language).
    /// A discarded job is not released; the coordinator keeps it leased until
    /// its own lease timeout.
    pub async fn claim_job(&self) -> Option<Job> {
        let response = self
            .client
            .post("/jobs/claim", None, self.client.default_retry())
            .await?;

        match response.status {
            200 => {}
            204 => {
                debug!("Job queue is empty");
                return None;
            }
            status => {
                warn!("Failed to claim job: unexpected status {}", status);
                return None;
            }
        }

        let payload: JobPayload = match response.json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to parse claimed job: {}", e);
                return None;
            }
        };

        self.resolve_job(payload).await
    }

    async fn resolve_job(&self, payload: JobPayload) -> Option<Job> {
        let problem = match payload.problem_id {
            Some(problem_id) => {
                if !self.ensure_problem(problem_id).await {
                    warn!(
                        "Dropping job {}: problem {} is unavailable",
                        payload.id, problem_id
                    );
                    return None;
                }
                match self.problems.get(problem_id).await {
                    Some(problem) => Some(problem),
                    None => {
                        warn!(
                            "Dropping job {}: problem {} missing from cache",
                            payload.id, problem_id
                        );
                        return None;
                    }
                }
            }
            None => None,
        };

        let language = match self.languages.resolve(&payload.language) {
            Ok(language) => language,
            Err(e) => {
                error!("Dropping job {}: {}", payload.id, e);
                return None;
            }
        };

        Some(Job {
            id: payload.id,
            verification_code: payload.verification_code,
            problem,
            code: payload.code,
            language,
        })
    }

    /// Give a lease back to the coordinator. True only on HTTP 200.
    pub async fn release_job(&self, job: &Job, retry: RetryPolicy) -> bool {
        let body = json!({ "verification_code": job.verification_code });

        let response = self
            .client
            .post(&format!("/jobs/{}/cancel", job.id), Some(body), retry)
            .await;
        matches!(response, Some(r) if r.status == 200)
    }

    /// Report a partial or terminal result. True only on HTTP 200.
    pub async fn submit_result(&self, result: &ExecutionResult) -> bool {
        let body = json!({
            "verification_code": result.job.verification_code,
            "verdict": result.verdict.map(|v| v.code()).unwrap_or(""),
            "last_ran_case": result.last_ran_case,
            "execution_time": result.execution_time,
            "execution_memory": result.execution_memory,
        });

        let response = self
            .client
            .post(
                &format!("/jobs/{}/submit", result.job.id),
                Some(body),
                self.client.default_retry(),
            )
            .await;
        matches!(response, Some(r) if r.status == 200)
    }
}
