//! Dispatch loop: claim, extract, normalize, persist, settle.
//!
//! In-flight jobs are bounded by a semaphore. The loop idles on a fixed
//! poll interval whenever nothing is dispatchable or the ceiling is reached.
//! The scheduler alone decides retries: the executor and normalizer only
//! report what happened.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::error::{AppError, Result};
use crate::models::{
    EntityType, JobStatus, RecordData, ScrapeJob, SourceConfig, TargetRef, TrackedEntity,
    ValidationResult,
};
use crate::pipeline::{Normalizer, QualityReporter};
use crate::scheduler::queue::JobQueue;
use crate::services::{ScrapeOutcome, ScrapeRequest, ScraperExecutor};
use crate::storage::{EntityStore, RecordStore};

/// Payload stored on a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobPayload {
    pub source_id: String,
    pub url: String,
    pub entity_type: EntityType,
    pub external_id: String,
    /// Only valid records are written to the record store
    pub persisted: bool,
    pub confidence: f64,
    pub validation: ValidationResult,
    pub record: RecordData,
}

/// Final statuses of the jobs a drain processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Jobs whose processing hit an error outside the lifecycle
    pub errors: usize,
}

impl DrainSummary {
    fn add(&mut self, result: Result<JobStatus>) {
        match result {
            Ok(JobStatus::Completed) => self.completed += 1,
            Ok(JobStatus::Pending) => self.retried += 1,
            Ok(_) => self.failed += 1,
            Err(_) => self.errors += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed + self.errors
    }
}

/// Drives the queue.
#[derive(Clone)]
pub struct Scheduler {
    queue: JobQueue,
    executor: Arc<ScraperExecutor>,
    normalizer: Normalizer,
    reporter: QualityReporter,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        queue: JobQueue,
        executor: Arc<ScraperExecutor>,
        normalizer: Normalizer,
        reporter: QualityReporter,
    ) -> Self {
        let concurrency = queue.config().concurrency.max(1);
        let poll_interval = queue.config().poll_interval();
        Self {
            queue,
            executor,
            normalizer,
            reporter,
            permits: Arc::new(Semaphore::new(concurrency)),
            poll_interval,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Run until the process is stopped.
    pub async fn run_forever(&self) {
        self.run_until(std::future::pending()).await;
    }

    /// Run the dispatch loop until `shutdown` resolves, then wait for
    /// in-flight jobs to finish.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut tasks = JoinSet::new();
        log::info!(
            "Scheduler started (concurrency {}, poll {:?})",
            self.queue.config().concurrency,
            self.poll_interval
        );

        loop {
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                permit = Arc::clone(&self.permits).acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    let this = self.clone();
                    tasks.spawn(async move { this.dispatch(job, permit).await });
                    continue;
                }
                Ok(None) => {
                    drop(permit);
                    self.flush_quality(false).await;
                }
                Err(e) => {
                    log::error!("Failed to claim next job: {}", e);
                    drop(permit);
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        log::info!("Scheduler stopping, waiting for {} in-flight jobs", tasks.len());
        while tasks.join_next().await.is_some() {}
        self.flush_quality(true).await;
    }

    /// Process jobs until none is dispatchable and nothing is in flight.
    ///
    /// Jobs waiting out a backoff delay are left pending.
    pub async fn drain(&self) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();
        let mut tasks = JoinSet::new();

        loop {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| AppError::conflict("scheduler is shut down"))?;

            if let Some(job) = self.queue.claim_next().await? {
                let this = self.clone();
                tasks.spawn(async move { this.dispatch(job, permit).await });
                continue;
            }
            drop(permit);

            // A finishing job may requeue itself, so look again after each one
            match tasks.join_next().await {
                Some(joined) => summary.add(joined.unwrap_or_else(|e| {
                    Err(AppError::storage(format!("job task panicked: {e}")))
                })),
                None => break,
            }
        }
        self.flush_quality(true).await;
        Ok(summary)
    }

    /// Report quality windows that have run their span, or all of them.
    async fn flush_quality(&self, all: bool) {
        let flushed = if all {
            self.reporter.flush_all().await
        } else {
            self.reporter.flush_due().await
        };
        if let Err(e) = flushed {
            log::warn!("Quality reports not stored: {}", e);
        }
    }

    async fn dispatch(&self, job: ScrapeJob, _permit: OwnedSemaphorePermit) -> Result<JobStatus> {
        let id = job.id;
        match self.process_job(job).await {
            Ok(status) => Ok(status),
            Err(e) => {
                log::error!("Job {}: processing aborted: {}", id, e);
                // Infrastructure failure mid-job; hand it back for retry
                if let Err(settle) = self.queue.on_failure(id, &e.to_string()).await {
                    log::error!("Job {}: could not record failure: {}", id, settle);
                }
                Err(e)
            }
        }
    }

    /// Run one job that is already pending, under the concurrency ceiling.
    pub async fn run_job(&self, job_id: uuid::Uuid) -> Result<JobStatus> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::conflict("scheduler is shut down"))?;
        let job = self.queue.claim(job_id).await?;
        self.dispatch(job, permit).await
    }

    /// Resolve, extract, normalize and settle one running job.
    ///
    /// Returns the status the job ended in.
    pub async fn process_job(&self, mut job: ScrapeJob) -> Result<JobStatus> {
        let entity_type = job.kind.entity_type();

        let entity = match &job.target {
            TargetRef::Entity(id) => match self.queue.store().get_entity(id).await? {
                Some(entity) => Some(entity),
                None => {
                    let message = format!("tracked entity '{id}' no longer exists");
                    self.queue.fail_permanently(job.id, &message).await?;
                    return Ok(JobStatus::Failed);
                }
            },
            _ => None,
        };

        let Some(source) = self.resolve_source(&job, entity_type, entity.as_ref()) else {
            let message = format!("no usable source for {} ({})", job.target, entity_type);
            self.queue.fail_permanently(job.id, &message).await?;
            return Ok(JobStatus::Failed);
        };
        if job.source_id.as_deref() != Some(source.id.as_str()) {
            self.queue.assign_source(&mut job, &source.id).await?;
        }

        let request = ScrapeRequest {
            job_id: job.id,
            target: job.target.clone(),
            query: search_query(&job.target, entity.as_ref()),
            source,
        };
        let outcome = self.executor.execute(&request).await;
        self.settle(&job, &request.source, entity_type, outcome).await
    }

    fn resolve_source(
        &self,
        job: &ScrapeJob,
        entity_type: EntityType,
        entity: Option<&TrackedEntity>,
    ) -> Option<SourceConfig> {
        let registry = self.queue.registry();
        match &job.source_id {
            Some(id) => registry.resolve_id(id, entity_type),
            None => registry.resolve(&job.target, entity_type, entity),
        }
    }

    async fn settle(
        &self,
        job: &ScrapeJob,
        source: &SourceConfig,
        entity_type: EntityType,
        outcome: ScrapeOutcome,
    ) -> Result<JobStatus> {
        let retryable = outcome.is_retryable();
        let raw = match outcome.data {
            Some(raw) if outcome.success => raw,
            _ => {
                let error = outcome.error.unwrap_or_else(|| "extraction failed".to_string());
                if retryable {
                    return self.queue.on_failure(job.id, &error).await;
                }
                self.queue.fail_permanently(job.id, &error).await?;
                return Ok(JobStatus::Failed);
            }
        };

        let normalized = self.normalizer.normalize(&raw, source, entity_type);
        let persisted = if normalized.validation.is_valid {
            self.queue
                .store()
                .upsert_record(&normalized.record)
                .await?;
            true
        } else {
            log::warn!(
                "Job {}: record from {} failed validation: {}",
                job.id,
                source.id,
                normalized.validation.errors.join("; ")
            );
            false
        };

        if let Err(e) = self
            .reporter
            .observe(&source.id, entity_type, normalized.clone())
            .await
        {
            log::warn!("Job {}: quality report not stored: {}", job.id, e);
        }

        let payload = JobPayload {
            source_id: source.id.clone(),
            url: raw.url,
            entity_type,
            external_id: normalized.record.external_id.clone(),
            persisted,
            confidence: normalized.record.confidence,
            validation: normalized.validation,
            record: normalized.record.data,
        };
        self.queue
            .on_complete(job.id, serde_json::to_value(&payload)?)
            .await?;
        Ok(JobStatus::Completed)
    }
}

/// Text typed into a source's search form for a target.
fn search_query(target: &TargetRef, entity: Option<&TrackedEntity>) -> Option<String> {
    match target {
        TargetRef::Url(_) => None,
        TargetRef::PostalCode(code) => Some(code.trim().to_string()),
        TargetRef::Entity(_) => entity.and_then(TrackedEntity::search_query),
    }
}
