//! Local filesystem store.
//!
//! Keeps everything in a [`MemoryStore`] and writes the whole state to
//! `{root}/store.json` after every mutation. Writes go to a temp file that is
//! then renamed over the snapshot, so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{JobStatus, NormalizedRecord, QualityReport, ScrapeJob, TargetRef, TrackedEntity};
use crate::storage::{EntityStore, JobStore, MemoryStore, RecordStore, Snapshot};

const SNAPSHOT_FILE: &str = "store.json";

/// JSON-file-backed store.
pub struct LocalStore {
    path: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open the store under `root_dir`, restoring any existing snapshot.
    pub async fn open(root_dir: impl AsRef<Path>) -> Result<Self> {
        let path = root_dir.as_ref().join(SNAPSHOT_FILE);
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(AppError::Io(e)),
        };
        log::debug!(
            "Opened store {:?}: {} jobs, {} records",
            path,
            snapshot.jobs.len(),
            snapshot.records.len()
        );
        Ok(Self {
            path,
            memory: MemoryStore::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.memory.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.write_bytes(&bytes)
            .await
            .map_err(|e| AppError::storage(format!("snapshot {:?}: {e}", self.path)))
    }
}

#[async_trait]
impl JobStore for LocalStore {
    async fn create_job(&self, job: &ScrapeJob) -> Result<()> {
        self.memory.create_job(job).await?;
        self.persist().await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScrapeJob>> {
        self.memory.get_job(id).await
    }

    async fn update_job_if(&self, expected: JobStatus, job: &ScrapeJob) -> Result<bool> {
        let applied = self.memory.update_job_if(expected, job).await?;
        if applied {
            self.persist().await?;
        }
        Ok(applied)
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScrapeJob>> {
        self.memory.list_jobs(status, limit).await
    }

    async fn next_dispatchable(&self, now: DateTime<Utc>) -> Result<Option<ScrapeJob>> {
        self.memory.next_dispatchable(now).await
    }

    async fn count_jobs_by_status(&self) -> Result<BTreeMap<JobStatus, usize>> {
        self.memory.count_jobs_by_status().await
    }

    async fn has_active_job(&self, target: &TargetRef) -> Result<bool> {
        self.memory.has_active_job(target).await
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.memory.delete_finished_before(cutoff).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<bool> {
        let inserted = self.memory.upsert_record(record).await?;
        self.persist().await?;
        Ok(inserted)
    }

    async fn get_record(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<NormalizedRecord>> {
        self.memory.get_record(source_id, external_id).await
    }

    async fn count_records_by_source(&self) -> Result<BTreeMap<String, usize>> {
        self.memory.count_records_by_source().await
    }

    async fn append_quality_report(&self, report: &QualityReport) -> Result<()> {
        self.memory.append_quality_report(report).await?;
        self.persist().await
    }

    async fn quality_reports(
        &self,
        source_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QualityReport>> {
        self.memory.quality_reports(source_id, limit).await
    }
}

#[async_trait]
impl EntityStore for LocalStore {
    async fn upsert_entity(&self, entity: &TrackedEntity) -> Result<()> {
        self.memory.upsert_entity(entity).await?;
        self.persist().await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<TrackedEntity>> {
        self.memory.get_entity(id).await
    }

    async fn stale_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<TrackedEntity>> {
        self.memory.stale_entities(cutoff).await
    }

    async fn mark_refreshed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.memory.mark_refreshed(id, at).await?;
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, JobKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let job = ScrapeJob::new(
            JobKind::PropertyListing,
            TargetRef::Url("https://listings.example-brokerage.com/l/1".into()),
            2,
            3,
        );
        {
            let store = LocalStore::open(dir.path()).await.unwrap();
            store.create_job(&job).await.unwrap();
            store
                .upsert_entity(&TrackedEntity::new("apn-1", EntityType::TaxAssessment))
                .await
                .unwrap();
        }

        let reopened = LocalStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_job(job.id).await.unwrap(), Some(job));
        assert!(reopened.get_entity("apn-1").await.unwrap().is_some());
        assert!(!dir.path().join("store.tmp").exists());
    }

    #[tokio::test]
    async fn test_open_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("nested")).await.unwrap();
        assert!(store.list_jobs(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("store.json"), b"{not json").unwrap();
        assert!(LocalStore::open(dir.path()).await.is_err());
    }
}
