use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{DubbingPipeline, JobOutcome};
use crate::error::{DubError, Result};
use crate::job::JobId;

/// Runs several jobs side by side, bounded by `job_concurrency`.
///
/// Each job still executes its own stages strictly in order; only
/// different jobs overlap.
pub struct WorkerPool {
    pipeline: Arc<DubbingPipeline>,
    job_concurrency: usize,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<DubbingPipeline>, job_concurrency: usize) -> Self {
        Self {
            pipeline,
            job_concurrency: job_concurrency.max(1),
        }
    }

    pub fn pipeline(&self) -> &Arc<DubbingPipeline> {
        &self.pipeline
    }

    /// Drive every job to completion or failure.
    ///
    /// Results come back in the order the ids were given.
    pub async fn run_jobs(&self, job_ids: Vec<JobId>) -> Vec<(JobId, Result<JobOutcome>)> {
        info!(
            "Running {} jobs with up to {} at a time",
            job_ids.len(),
            self.job_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.job_concurrency));
        let mut tasks = JoinSet::new();

        for (position, job_id) in job_ids.iter().copied().enumerate() {
            let sem = semaphore.clone();
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                let result = match sem.acquire_owned().await {
                    Ok(_permit) => pipeline.run_job(job_id).await,
                    Err(_) => Err(DubError::Cancelled),
                };
                (position, result)
            });
        }

        let mut slots: Vec<Option<Result<JobOutcome>>> = job_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => slots[position] = Some(result),
                Err(e) => warn!("Job worker task failed: {}", e),
            }
        }

        job_ids
            .into_iter()
            .zip(slots)
            .map(|(id, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(DubError::Io(std::io::Error::other(format!(
                        "worker for job {} did not finish",
                        id
                    ))))
                });
                (id, result)
            })
            .collect()
    }
}
