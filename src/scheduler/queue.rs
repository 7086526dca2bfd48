//! Durable job queue with lifecycle transitions.
//!
//! Every transition reads the job, checks the move is legal, and writes it
//! back with a conditional update on the status it read. A lost race is
//! reported as a conflict rather than overwriting the winner.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    JobKind, JobStatus, JobStatusView, SchedulerConfig, ScrapeJob, TargetRef, TrackedEntity,
};
use crate::scheduler::backoff;
use crate::services::SourceRegistry;
use crate::storage::{EntityStore, JobStore, Store};

/// Options for [`JobQueue::enqueue_with`].
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub kind: JobKind,
    pub target: TargetRef,
    /// Lower dispatches sooner; the configured default when absent
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    /// Skip resolution and use this source
    pub source_id: Option<String>,
}

impl EnqueueRequest {
    pub fn new(kind: JobKind, target: TargetRef) -> Self {
        Self {
            kind,
            target,
            priority: None,
            max_retries: None,
            source_id: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// The job queue. Constructed once and shared by reference.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    registry: Arc<SourceRegistry>,
    config: SchedulerConfig,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>, registry: Arc<SourceRegistry>, config: SchedulerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Enqueue a job and return its id.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        target: TargetRef,
        priority: i32,
        max_retries: u32,
    ) -> Result<Uuid> {
        self.enqueue_with(
            EnqueueRequest::new(kind, target)
                .priority(priority)
                .max_retries(max_retries),
        )
        .await
    }

    pub async fn enqueue_with(&self, request: EnqueueRequest) -> Result<Uuid> {
        match &request.target {
            TargetRef::Url(url) => {
                url::Url::parse(url)?;
            }
            TargetRef::PostalCode(code) => {
                if !code.chars().any(|c| c.is_ascii_digit()) {
                    return Err(AppError::validation(format!("invalid postal code '{code}'")));
                }
            }
            TargetRef::Entity(id) => {
                if self.store.get_entity(id).await?.is_none() {
                    return Err(AppError::not_found("entity", id));
                }
            }
        }
        if let Some(id) = &request.source_id {
            if self.registry.get(id).is_none() {
                return Err(AppError::not_found("source", id));
            }
        }

        let mut job = ScrapeJob::new(
            request.kind,
            request.target,
            request.priority.unwrap_or(self.config.default_priority),
            request.max_retries.unwrap_or(self.config.default_max_retries),
        );
        job.source_id = request.source_id;
        self.store.create_job(&job).await?;

        log::info!(
            "Enqueued job {} ({:?} {}, priority {})",
            job.id,
            job.kind,
            job.target,
            job.priority
        );
        Ok(job.id)
    }

    /// Register or update an entity for periodic refresh.
    pub async fn track(&self, entity: &TrackedEntity) -> Result<()> {
        self.store.upsert_entity(entity).await
    }

    async fn load(&self, id: Uuid) -> Result<ScrapeJob> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::not_found("job", id))
    }

    /// Write `job` if the stored copy is still in `from`.
    async fn transition(&self, from: JobStatus, job: &ScrapeJob) -> Result<()> {
        if !from.can_transition_to(job.status) {
            return Err(AppError::conflict(format!(
                "job {} cannot move from {} to {}",
                job.id, from, job.status
            )));
        }
        if self.store.update_job_if(from, job).await? {
            Ok(())
        } else {
            Err(AppError::conflict(format!(
                "job {} is no longer {}",
                job.id, from
            )))
        }
    }

    /// Cancel a pending job. Running and finished jobs are rejected.
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let mut job = self.load(id).await?;
        if job.status != JobStatus::Pending {
            return Err(AppError::conflict(format!(
                "job {} is {} and cannot be cancelled",
                id, job.status
            )));
        }
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some("cancelled".to_string());
        self.transition(JobStatus::Pending, &job).await?;
        log::info!("Cancelled job {}", id);
        Ok(())
    }

    /// Claim the next dispatchable job and mark it running.
    pub async fn claim_next(&self) -> Result<Option<ScrapeJob>> {
        loop {
            let now = Utc::now();
            let Some(mut job) = self.store.next_dispatchable(now).await? else {
                return Ok(None);
            };
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.available_at = None;
            if self.store.update_job_if(JobStatus::Pending, &job).await? {
                log::debug!("Claimed job {}", job.id);
                return Ok(Some(job));
            }
            // Someone else claimed or cancelled it; look again
        }
    }

    /// Claim one specific pending job, ignoring dispatch order and backoff.
    pub async fn claim(&self, id: Uuid) -> Result<ScrapeJob> {
        let mut job = self.load(id).await?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.available_at = None;
        self.transition(JobStatus::Pending, &job).await?;
        Ok(job)
    }

    /// Mark a running job completed with its result payload.
    pub async fn on_complete(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        let mut job = self.load(id).await?;
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.result = Some(result);
        job.error_message = None;
        self.transition(JobStatus::Running, &job).await?;

        if let TargetRef::Entity(entity_id) = &job.target {
            self.store.mark_refreshed(entity_id, now).await?;
        }
        log::info!("Job {} completed", id);
        Ok(())
    }

    /// Record a retryable failure of a running job.
    ///
    /// The job goes back to pending behind a backoff delay while
    /// `retry_count < max_retries`, and fails otherwise. Returns the new status.
    pub async fn on_failure(&self, id: Uuid, error: &str) -> Result<JobStatus> {
        let mut job = self.load(id).await?;
        if job.status != JobStatus::Running {
            return Err(AppError::conflict(format!(
                "job {} is {}, not running",
                id, job.status
            )));
        }
        let now = Utc::now();
        job.retry_count += 1;
        job.error_message = Some(error.to_string());

        if job.retry_count < job.max_retries {
            let delay = backoff::next_delay(&self.config.backoff, job.retry_count);
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.available_at = ChronoDuration::from_std(delay)
                .ok()
                .map(|d| now + d);
            self.transition(JobStatus::Running, &job).await?;
            log::warn!(
                "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
                id,
                job.retry_count,
                job.max_retries,
                delay,
                error
            );
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            self.transition(JobStatus::Running, &job).await?;
            log::error!(
                "Job {} failed after {} attempts: {}",
                id,
                job.retry_count,
                error
            );
        }
        Ok(job.status)
    }

    /// Fail a job without retry (configuration errors).
    pub async fn fail_permanently(&self, id: Uuid, error: &str) -> Result<()> {
        let mut job = self.load(id).await?;
        let from = job.status;
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(error.to_string());
        self.transition(from, &job).await?;
        log::error!("Job {} failed permanently: {}", id, error);
        Ok(())
    }

    /// Record the source a running job resolved to.
    pub async fn assign_source(&self, job: &mut ScrapeJob, source_id: &str) -> Result<()> {
        job.source_id = Some(source_id.to_string());
        if self.store.update_job_if(job.status, job).await? {
            Ok(())
        } else {
            Err(AppError::conflict(format!("job {} changed during dispatch", job.id)))
        }
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatusView> {
        Ok(JobStatusView::from(&self.load(id).await?))
    }

    pub async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<JobStatusView>> {
        Ok(self
            .store
            .list_jobs(status, limit)
            .await?
            .iter()
            .map(JobStatusView::from)
            .collect())
    }

    pub async fn counts(&self) -> Result<BTreeMap<JobStatus, usize>> {
        self.store.count_jobs_by_status().await
    }

    /// Delete completed and failed jobs older than `older_than_days`.
    pub async fn cleanup(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days.max(0));
        let removed = self.store.delete_finished_before(cutoff).await?;
        log::info!("Cleanup removed {} finished jobs older than {} days", removed, older_than_days);
        Ok(removed)
    }

    /// Enqueue refresh jobs for up to `max_jobs` stale entities.
    ///
    /// Entities with no compatible source, or with a job already pending or
    /// running, are skipped.
    pub async fn bulk_enqueue_stale(&self, max_jobs: usize) -> Result<Vec<Uuid>> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.stale_after_days);
        let mut created = Vec::new();
        if max_jobs == 0 {
            return Ok(created);
        }

        for entity in self.store.stale_entities(cutoff).await? {
            if self.registry.resolve_entity(&entity).is_none() {
                log::debug!("Entity {} has no compatible source, skipped", entity.id);
                continue;
            }
            let target = TargetRef::Entity(entity.id.clone());
            if self.store.has_active_job(&target).await? {
                continue;
            }

            let mut job = ScrapeJob::new(
                JobKind::for_entity(entity.entity_type),
                target,
                self.config.default_priority,
                self.config.default_max_retries,
            );
            job.source_id = entity.source_id.clone();
            self.store.create_job(&job).await?;
            created.push(job.id);

            if created.len() >= max_jobs {
                break;
            }
        }

        log::info!("Enqueued {} stale entities", created.len());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackoffConfig, EntityType};
    use crate::storage::MemoryStore;

    fn queue() -> JobQueue {
        let config = SchedulerConfig {
            backoff: BackoffConfig::immediate(),
            ..SchedulerConfig::default()
        };
        JobQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SourceRegistry::with_defaults()),
            config,
        )
    }

    fn beverly_hills() -> TargetRef {
        TargetRef::PostalCode("90210".into())
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let q = queue();
        let id = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        let status = q.status(id).await.unwrap();
        assert_eq!(status.status, JobStatus::Pending);

        let job = q.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(q.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_order() {
        let q = queue();
        let mut ids = Vec::new();
        for priority in [9, 1, 1] {
            ids.push(q.enqueue(JobKind::TaxAssessment, beverly_hills(), priority, 3).await.unwrap());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let mut order = Vec::new();
        while let Some(job) = q.claim_next().await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let q = queue();
        let pending = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        q.cancel(pending).await.unwrap();
        let view = q.status(pending).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("cancelled"));

        let running = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        q.claim_next().await.unwrap();
        assert!(matches!(q.cancel(running).await, Err(AppError::Conflict(_))));
        assert!(matches!(q.cancel(pending).await, Err(AppError::Conflict(_))));
        assert!(matches!(q.cancel(Uuid::new_v4()).await, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_retry_budget() {
        let q = queue();
        let id = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();

        for attempt in 1..=3u32 {
            let job = q.claim_next().await.unwrap().unwrap();
            assert!(job.retry_count < job.max_retries);
            let status = q.on_failure(id, &format!("error {attempt}")).await.unwrap();
            let expected = if attempt < 3 { JobStatus::Pending } else { JobStatus::Failed };
            assert_eq!(status, expected);
        }

        let view = q.status(id).await.unwrap();
        assert_eq!(view.retry_count, 3);
        assert_eq!(view.error_message.as_deref(), Some("error 3"));
        assert!(view.completed_at.is_some());
        assert!(q.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backoff_delays_redispatch() {
        let config = SchedulerConfig {
            backoff: BackoffConfig {
                base_ms: 60_000,
                max_ms: 60_000,
                jitter: 0.0,
            },
            ..SchedulerConfig::default()
        };
        let q = JobQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SourceRegistry::with_defaults()),
            config,
        );
        let id = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        q.claim_next().await.unwrap();
        assert_eq!(q.on_failure(id, "timeout").await.unwrap(), JobStatus::Pending);
        assert!(q.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let q = queue();
        let id = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        q.claim_next().await.unwrap();
        q.on_complete(id, serde_json::json!({ "persisted": true })).await.unwrap();

        assert!(q.on_complete(id, serde_json::json!({})).await.is_err());
        assert!(q.on_failure(id, "late").await.is_err());
        assert!(q.fail_permanently(id, "late").await.is_err());
        let view = q.status(id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.result, Some(serde_json::json!({ "persisted": true })));
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let q = queue();
        let bad_url = q
            .enqueue(JobKind::PropertyListing, TargetRef::Url("not a url".into()), 5, 3)
            .await;
        assert!(bad_url.is_err());

        let unknown_entity = q
            .enqueue(JobKind::TaxAssessment, TargetRef::Entity("nope".into()), 5, 3)
            .await;
        assert!(matches!(unknown_entity, Err(AppError::NotFound { .. })));

        let unknown_source = q
            .enqueue_with(EnqueueRequest::new(JobKind::TaxAssessment, beverly_hills()).source("nope"))
            .await;
        assert!(matches!(unknown_source, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_bulk_enqueue_stale() {
        let q = queue();
        let mut la = TrackedEntity::new("apn-4333-001-002", EntityType::TaxAssessment);
        la.postal_code = Some("90210".into());
        let mut nowhere = TrackedEntity::new("apn-unknown", EntityType::TaxAssessment);
        nowhere.postal_code = Some("00501".into());
        let mut fresh = TrackedEntity::new("apn-fresh", EntityType::TaxAssessment);
        fresh.postal_code = Some("90012".into());
        fresh.last_refreshed_at = Some(Utc::now());
        for e in [&la, &nowhere, &fresh] {
            q.track(e).await.unwrap();
        }

        let created = q.bulk_enqueue_stale(10).await.unwrap();
        assert_eq!(created.len(), 1);
        let view = q.status(created[0]).await.unwrap();
        assert_eq!(view.target, TargetRef::Entity("apn-4333-001-002".into()));
        assert_eq!(view.kind, JobKind::TaxAssessment);

        // Already has an active job
        assert!(q.bulk_enqueue_stale(10).await.unwrap().is_empty());
        assert!(q.bulk_enqueue_stale(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_marks_entity_refreshed() {
        let q = queue();
        let mut la = TrackedEntity::new("apn-1", EntityType::TaxAssessment);
        la.postal_code = Some("90210".into());
        q.track(&la).await.unwrap();

        let id = q
            .enqueue(JobKind::TaxAssessment, TargetRef::Entity("apn-1".into()), 5, 3)
            .await
            .unwrap();
        q.claim_next().await.unwrap();
        q.on_complete(id, serde_json::json!({})).await.unwrap();

        let entity = q.store().get_entity("apn-1").await.unwrap().unwrap();
        assert!(entity.last_refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_cleanup() {
        let q = queue();
        let id = q.enqueue(JobKind::TaxAssessment, beverly_hills(), 5, 3).await.unwrap();
        q.cancel(id).await.unwrap();
        assert_eq!(q.cleanup(0).await.unwrap(), 1);
        let counts = q.counts().await.unwrap();
        assert!(counts.is_empty());
    }
}
