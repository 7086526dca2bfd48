//! Persistence for jobs, records, quality reports and tracked entities.
//!
//! The queue relies on [`JobStore::update_job_if`] being atomic: a job is
//! only written when its stored status still equals the status the caller
//! read, so two lifecycle owners can never both move the same job.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: in-process maps, used by tests and one-shot runs
//! - [`LocalStore`]: `MemoryStore` plus an atomic JSON snapshot on disk
//!
//! ```text
//! storage/
//! ├── config.toml     # Pipeline configuration
//! ├── sources.toml    # Source registry
//! └── store.json      # Jobs, records, reports, entities
//! ```

pub mod local;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{JobStatus, NormalizedRecord, QualityReport, ScrapeJob, TargetRef, TrackedEntity};

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Durable job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &ScrapeJob) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<ScrapeJob>>;

    /// Replace the stored job only if its status still equals `expected`.
    ///
    /// Returns `false` when the job is missing or was moved by someone else.
    async fn update_job_if(&self, expected: JobStatus, job: &ScrapeJob) -> Result<bool>;

    /// Jobs, newest first, optionally filtered by status.
    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScrapeJob>>;

    /// The pending job that should dispatch next at `now`:
    /// priority ascending, then creation time ascending.
    async fn next_dispatchable(&self, now: DateTime<Utc>) -> Result<Option<ScrapeJob>>;

    async fn count_jobs_by_status(&self) -> Result<BTreeMap<JobStatus, usize>>;

    /// Whether a pending or running job already points at `target`.
    async fn has_active_job(&self, target: &TargetRef) -> Result<bool>;

    /// Delete completed and failed jobs finished before `cutoff`.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Normalized records and quality history.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace by `(source_id, external_id)`.
    ///
    /// Returns `true` when the record was new.
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<bool>;

    async fn get_record(&self, source_id: &str, external_id: &str)
    -> Result<Option<NormalizedRecord>>;

    async fn count_records_by_source(&self) -> Result<BTreeMap<String, usize>>;

    /// Quality rows are append-only.
    async fn append_quality_report(&self, report: &QualityReport) -> Result<()>;

    /// Past quality rows, newest first.
    async fn quality_reports(
        &self,
        source_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QualityReport>>;
}

/// Entities kept fresh by periodic re-ingestion.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn upsert_entity(&self, entity: &TrackedEntity) -> Result<()>;

    async fn get_entity(&self, id: &str) -> Result<Option<TrackedEntity>>;

    /// Entities never refreshed or refreshed before `cutoff`, ordered
    /// oldest-refreshed first (never-refreshed before all), then newest-created.
    async fn stale_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<TrackedEntity>>;

    async fn mark_refreshed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Everything the scheduler persists.
pub trait Store: JobStore + RecordStore + EntityStore {}

impl<T: JobStore + RecordStore + EntityStore> Store for T {}

/// Serialized form of a whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jobs: Vec<ScrapeJob>,
    #[serde(default)]
    pub records: Vec<NormalizedRecord>,
    #[serde(default)]
    pub quality_reports: Vec<QualityReport>,
    #[serde(default)]
    pub entities: Vec<TrackedEntity>,
}
