// src/models/quality.rs

//! Batch quality statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::EntityType;

/// Health statistics for one processed batch.
///
/// Append-only: one row per (source, data type, window) batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub id: Uuid,
    pub source_id: String,
    pub data_type: EntityType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub missing_required: usize,
    /// `valid / total * 100`, zero for an empty batch
    pub completeness_score: f64,
    /// Mean confidence across the batch
    pub avg_confidence: f64,
    pub created_at: DateTime<Utc>,
}
