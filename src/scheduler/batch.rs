//! Institutional batch runs.
//!
//! A batch is split into chunks; the jobs of one chunk run concurrently and
//! still share the scheduler's global concurrency ceiling. Each target gets
//! one attempt here; retryable failures stay pending for the regular loop.

use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{JobStatus, TargetRef};
use crate::scheduler::queue::EnqueueRequest;
use crate::scheduler::worker::Scheduler;

/// What happened to one target of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub target: TargetRef,
    pub job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

/// Runs a list of targets chunk by chunk.
pub struct BatchRunner {
    scheduler: Scheduler,
    chunk_size: usize,
}

impl BatchRunner {
    pub fn new(scheduler: Scheduler) -> Self {
        let chunk_size = scheduler.queue().config().batch_chunk_size.max(1);
        Self {
            scheduler,
            chunk_size,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn run(&self, requests: Vec<EnqueueRequest>) -> Result<Vec<BatchItem>> {
        let total = requests.len();
        let mut items = Vec::with_capacity(total);

        for (index, chunk) in requests.chunks(self.chunk_size).enumerate() {
            log::info!(
                "Batch chunk {} ({} of {} targets)",
                index + 1,
                chunk.len(),
                total
            );
            let results = join_all(chunk.iter().cloned().map(|request| self.run_one(request))).await;
            items.extend(results);
        }

        let completed = items
            .iter()
            .filter(|i| i.status == Some(JobStatus::Completed))
            .count();
        crate::utils::log::summary(
            "Batch",
            &[
                ("targets", total.to_string()),
                ("completed", completed.to_string()),
                ("not completed", (total - completed).to_string()),
            ],
        );
        Ok(items)
    }

    async fn run_one(&self, request: EnqueueRequest) -> BatchItem {
        let target = request.target.clone();
        let job_id = match self.scheduler.queue().enqueue_with(request).await {
            Ok(id) => id,
            Err(e) => {
                return BatchItem {
                    target,
                    job_id: None,
                    status: None,
                    error: Some(e.to_string()),
                };
            }
        };

        match self.scheduler.run_job(job_id).await {
            Ok(status) => {
                let error = match status {
                    JobStatus::Completed => None,
                    _ => self
                        .scheduler
                        .queue()
                        .status(job_id)
                        .await
                        .ok()
                        .and_then(|view| view.error_message),
                };
                BatchItem {
                    target,
                    job_id: Some(job_id),
                    status: Some(status),
                    error,
                }
            }
            Err(e) => BatchItem {
                target,
                job_id: Some(job_id),
                status: None,
                error: Some(e.to_string()),
            },
        }
    }
}
