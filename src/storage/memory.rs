//! In-process store.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{JobStatus, NormalizedRecord, QualityReport, ScrapeJob, TargetRef, TrackedEntity};
use crate::storage::{EntityStore, JobStore, RecordStore, Snapshot};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, ScrapeJob>,
    records: BTreeMap<(String, String), NormalizedRecord>,
    quality_reports: Vec<QualityReport>,
    entities: BTreeMap<String, TrackedEntity>,
}

/// Store backed by maps behind one `RwLock`.
///
/// Every trait method takes the lock once, so conditional updates are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let state = State {
            jobs: snapshot.jobs.into_iter().map(|j| (j.id, j)).collect(),
            records: snapshot
                .records
                .into_iter()
                .map(|r| ((r.source_id.clone(), r.external_id.clone()), r))
                .collect(),
            quality_reports: snapshot.quality_reports,
            entities: snapshot
                .entities
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy the whole store out, jobs in creation order.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        let mut jobs: Vec<ScrapeJob> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Snapshot {
            updated_at: Some(Utc::now()),
            jobs,
            records: state.records.values().cloned().collect(),
            quality_reports: state.quality_reports.clone(),
            entities: state.entities.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &ScrapeJob) -> Result<()> {
        self.state.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScrapeJob>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn update_job_if(&self, expected: JobStatus, job: &ScrapeJob) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job.id) {
            Some(stored) if stored.status == expected => {
                *stored = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ScrapeJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<ScrapeJob> = state
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| Reverse((j.created_at, j.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn next_dispatchable(&self, now: DateTime<Utc>) -> Result<Option<ScrapeJob>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.is_dispatchable(now))
            .min_by_key(|j| j.dispatch_key())
            .cloned())
    }

    async fn count_jobs_by_status(&self) -> Result<BTreeMap<JobStatus, usize>> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn has_active_job(&self, target: &TargetRef) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .any(|j| j.status.is_active() && &j.target == target))
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            let finished = job.completed_at.unwrap_or(job.created_at);
            !(job.status.is_terminal() && finished < cutoff)
        });
        Ok(before - state.jobs.len())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<bool> {
        let key = (record.source_id.clone(), record.external_id.clone());
        let previous = self.state.write().await.records.insert(key, record.clone());
        Ok(previous.is_none())
    }

    async fn get_record(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<NormalizedRecord>> {
        let key = (source_id.to_string(), external_id.to_string());
        Ok(self.state.read().await.records.get(&key).cloned())
    }

    async fn count_records_by_source(&self) -> Result<BTreeMap<String, usize>> {
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for (source_id, _) in state.records.keys() {
            *counts.entry(source_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn append_quality_report(&self, report: &QualityReport) -> Result<()> {
        self.state.write().await.quality_reports.push(report.clone());
        Ok(())
    }

    async fn quality_reports(
        &self,
        source_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QualityReport>> {
        let state = self.state.read().await;
        Ok(state
            .quality_reports
            .iter()
            .rev()
            .filter(|r| source_id.is_none_or(|id| r.source_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn upsert_entity(&self, entity: &TrackedEntity) -> Result<()> {
        self.state
            .write()
            .await
            .entities
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<TrackedEntity>> {
        Ok(self.state.read().await.entities.get(id).cloned())
    }

    async fn stale_entities(&self, cutoff: DateTime<Utc>) -> Result<Vec<TrackedEntity>> {
        let state = self.state.read().await;
        let mut stale: Vec<TrackedEntity> = state
            .entities
            .values()
            .filter(|e| e.is_stale(cutoff))
            .cloned()
            .collect();
        // None sorts before Some, so never-refreshed entities come first
        stale.sort_by_key(|e| (e.last_refreshed_at, Reverse(e.created_at)));
        Ok(stale)
    }

    async fn mark_refreshed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(entity) = self.state.write().await.entities.get_mut(id) {
            entity.last_refreshed_at = Some(at);
        }
        Ok(())
    }
}
