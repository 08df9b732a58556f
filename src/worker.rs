//! Worker loop
//!
//! One job at a time: claim, hand the job to the evaluator, forward every
//! result it yields to the judge API, repeat. The job being worked on is kept
//! in `CurrentLease` so the shutdown path can give it back.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{JudgeApi, RetryPolicy, Transport};
use crate::evaluator::Evaluator;
use crate::models::Job;

/// Single-slot handle on the job currently leased by this process
#[derive(Debug, Clone, Default)]
pub struct CurrentLease {
    slot: Arc<Mutex<Option<Arc<Job>>>>,
}

impl CurrentLease {
    pub fn set(&self, job: Arc<Job>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(job);
    }

    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn get(&self) -> Option<Arc<Job>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Option<Arc<Job>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct Worker<T: Transport, E: Evaluator> {
    api: Arc<JudgeApi<T>>,
    evaluator: E,
    lease: CurrentLease,
    idle_poll: Duration,
}

impl<T: Transport, E: Evaluator> Worker<T, E> {
    pub fn new(api: Arc<JudgeApi<T>>, evaluator: E, idle_poll: Duration) -> Self {
        Self {
            api,
            evaluator,
            lease: CurrentLease::default(),
            idle_poll,
        }
    }

    pub fn lease(&self) -> CurrentLease {
        self.lease.clone()
    }

    /// Poll for jobs forever, backing off while the queue is empty
    pub async fn run(&self) {
        info!("Waiting for jobs...");
        loop {
            if !self.run_once().await {
                tokio::time::sleep(self.idle_poll).await;
            }
        }
    }

    /// Claim and fully process one job. Returns false when no job was available.
    pub async fn run_once(&self) -> bool {
        let Some(job) = self.api.claim_job().await else {
            debug!("No jobs available.");
            return false;
        };
        let job = Arc::new(job);
        self.lease.set(job.clone());
        info!("Got job {}.", job.id);

        let mut results = self.evaluator.evaluate(job.clone());
        while let Some(result) = results.recv().await {
            match result.verdict {
                Some(verdict) => info!(
                    "Job {} finished with verdict {}; case: {}, time: {:.2}, memory: {}",
                    job.id,
                    verdict,
                    result.last_ran_case,
                    result.execution_time,
                    result.execution_memory
                ),
                None => info!(
                    "Job {} partially judged; case: {}, time: {:.2}, memory: {}",
                    job.id, result.last_ran_case, result.execution_time, result.execution_memory
                ),
            }

            if self.api.submit_result(&result).await {
                info!("Job {} successfully submitted.", job.id);
            } else {
                warn!(
                    "Job {} failed to submit result for case {}.",
                    job.id, result.last_ran_case
                );
            }
        }

        self.lease.clear();
        true
    }

    /// Give the current lease back with a single attempt. Returns whether a
    /// lease was held and the coordinator acknowledged its release.
    pub async fn release_current(&self) -> bool {
        let Some(job) = self.lease.take() else {
            return false;
        };

        info!("Releasing job {}.", job.id);
        let released = self.api.release_job(&job, RetryPolicy::NEVER).await;
        if released {
            info!("Job {} released.", job.id);
        } else {
            warn!("Failed to release job {}.", job.id);
        }
        released
    }
}
