// src/models/job.rs

//! Scrape job records and their lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::EntityType;

/// Lifecycle state of a job.
///
/// `pending -> running -> {completed | pending (retry) | failed}`;
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `pending -> failed` covers cancellation and configuration failures
    /// discovered before dispatch.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Pending)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// What a job scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// County assessor tax roll lookup
    TaxAssessment,
    /// Brokerage property listing
    PropertyListing,
    /// Market research publication
    MarketResearch,
    /// Comparable-sale transaction
    ComparableSale,
    /// Market statistic series
    MarketData,
}

impl JobKind {
    /// The canonical entity a job of this kind produces.
    pub fn entity_type(&self) -> EntityType {
        match self {
            JobKind::TaxAssessment => EntityType::TaxAssessment,
            JobKind::PropertyListing => EntityType::Property,
            JobKind::MarketResearch => EntityType::ResearchReport,
            JobKind::ComparableSale => EntityType::Transaction,
            JobKind::MarketData => EntityType::MarketDataPoint,
        }
    }

    /// The job kind that refreshes an entity of the given type.
    pub fn for_entity(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::TaxAssessment => JobKind::TaxAssessment,
            EntityType::Property => JobKind::PropertyListing,
            EntityType::ResearchReport => JobKind::MarketResearch,
            EntityType::Transaction => JobKind::ComparableSale,
            EntityType::MarketDataPoint => JobKind::MarketData,
        }
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tax_assessment" | "tax" => Ok(JobKind::TaxAssessment),
            "property_listing" | "listing" => Ok(JobKind::PropertyListing),
            "market_research" | "research" => Ok(JobKind::MarketResearch),
            "comparable_sale" | "comp" | "sale" => Ok(JobKind::ComparableSale),
            "market_data" => Ok(JobKind::MarketData),
            other => Err(AppError::validation(format!("unknown job kind '{other}'"))),
        }
    }
}

/// The thing a job is pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TargetRef {
    Url(String),
    PostalCode(String),
    Entity(String),
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Url(url) => write!(f, "url:{url}"),
            TargetRef::PostalCode(code) => write!(f, "postal:{code}"),
            TargetRef::Entity(id) => write!(f, "entity:{id}"),
        }
    }
}

/// A unit of scraping work against one source and entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeJob {
    pub id: Uuid,

    /// Resolved source; filled at enqueue when known, otherwise at dispatch
    #[serde(default)]
    pub source_id: Option<String>,

    pub kind: JobKind,
    pub target: TargetRef,
    pub status: JobStatus,

    /// Lower dispatches sooner
    pub priority: i32,

    pub retry_count: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Earliest dispatch time after a backoff
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl ScrapeJob {
    /// Create a new pending job.
    pub fn new(kind: JobKind, target: TargetRef, priority: i32, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: None,
            kind,
            target,
            status: JobStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            available_at: None,
            error_message: None,
            result: None,
        }
    }

    /// Whether the job can be dispatched at `now`.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at.is_none_or(|at| at <= now)
    }

    /// Dispatch ordering: priority ascending, then creation time ascending.
    pub fn dispatch_key(&self) -> (i32, DateTime<Utc>, Uuid) {
        (self.priority, self.created_at, self.id)
    }
}

/// What the status endpoint exposes for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub kind: JobKind,
    pub target: TargetRef,
    pub source_id: Option<String>,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Present only once the job has completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl From<&ScrapeJob> for JobStatusView {
    fn from(job: &ScrapeJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            kind: job.kind,
            target: job.target.clone(),
            source_id: job.source_id.clone(),
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message.clone(),
            result: if job.status == JobStatus::Completed {
                job.result.clone()
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Pending));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_dispatchable_respects_backoff() {
        let mut job = ScrapeJob::new(
            JobKind::TaxAssessment,
            TargetRef::PostalCode("90210".into()),
            5,
            3,
        );
        let now = Utc::now();
        assert!(job.is_dispatchable(now));

        job.available_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_dispatchable(now));
        assert!(job.is_dispatchable(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_status_view_hides_result_until_completed() {
        let mut job = ScrapeJob::new(
            JobKind::PropertyListing,
            TargetRef::Url("https://example.com/listing/1".into()),
            1,
            3,
        );
        job.result = Some(serde_json::json!({ "partial": true }));
        assert!(JobStatusView::from(&job).result.is_none());

        job.status = JobStatus::Completed;
        assert!(JobStatusView::from(&job).result.is_some());
    }

    #[test]
    fn test_target_serialization() {
        let json = serde_json::to_string(&TargetRef::PostalCode("90210".into())).unwrap();
        assert_eq!(json, r#"{"type":"postal_code","value":"90210"}"#);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("tax-assessment".parse::<JobKind>().unwrap(), JobKind::TaxAssessment);
        assert_eq!("comp".parse::<JobKind>().unwrap(), JobKind::ComparableSale);
        assert!("mortgage".parse::<JobKind>().is_err());
    }
}
