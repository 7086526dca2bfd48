// src/models/entity.rs

//! Entities tracked for periodic re-ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;

/// A property, parcel or market the system keeps fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: String,
    pub entity_type: EntityType,

    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// Two-letter region code
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,

    /// Source to use instead of resolving by location
    #[serde(default)]
    pub source_id: Option<String>,

    /// Detail page URL when the entity is known by link
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            address: None,
            city: None,
            region: None,
            postal_code: None,
            source_id: None,
            url: None,
            last_refreshed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Never refreshed, or last refreshed before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_refreshed_at.is_none_or(|at| at < cutoff)
    }

    /// Search text typed into a source's lookup form.
    pub fn search_query(&self) -> Option<String> {
        match (&self.address, &self.postal_code) {
            (Some(address), Some(zip)) => Some(format!("{address} {zip}")),
            (Some(address), None) => Some(address.clone()),
            (None, Some(zip)) => Some(zip.clone()),
            (None, None) => None,
        }
    }
}
