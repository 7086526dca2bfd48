// src/models/mod.rs

//! Domain models for the ingestion pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod entity;
mod job;
mod quality;
mod record;
mod source;

// Re-export all public types
pub use config::{
    BackoffConfig, Config, LoggingConfig, NormalizeConfig, RateLimitDefaults, SchedulerConfig,
    ScraperConfig,
};
pub use entity::TrackedEntity;
pub use job::{JobKind, JobStatus, JobStatusView, ScrapeJob, TargetRef};
pub use quality::QualityReport;
pub use record::{
    EntityType, MarketDataPointRecord, NormalizationOutcome, NormalizedRecord, PostalCode,
    PropertyRecord, RawExtractionResult, RecordData, ResearchReportRecord, TaxAssessmentRecord,
    TransactionRecord, ValidationResult,
};
pub use source::{
    AdapterKind, FieldKind, FieldLocator, RateLimitConfig, SourceConfig, SourceHealth,
    SourceStats,
};
