// src/models/source.rs

//! Per-jurisdiction / per-provider source configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntityType;
use crate::utils::get_domain;

/// How a raw locator match is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    /// Currency and separators are stripped; unparsable values are dropped
    Number,
}

/// Where a field lives on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LocatorRepr")]
pub struct FieldLocator {
    /// CSS selector for the element
    pub selector: String,

    pub kind: FieldKind,

    /// Read this attribute instead of the element text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

impl FieldLocator {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            kind: FieldKind::Text,
            attr: None,
        }
    }

    pub fn number(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            kind: FieldKind::Number,
            attr: None,
        }
    }
}

/// Locators may be written as a bare selector string in TOML.
#[derive(Deserialize)]
#[serde(untagged)]
enum LocatorRepr {
    Short(String),
    Full {
        selector: String,
        #[serde(default)]
        kind: FieldKind,
        #[serde(default)]
        attr: Option<String>,
    },
}

impl From<LocatorRepr> for FieldLocator {
    fn from(repr: LocatorRepr) -> Self {
        match repr {
            LocatorRepr::Short(selector) => FieldLocator::text(selector),
            LocatorRepr::Full {
                selector,
                kind,
                attr,
            } => FieldLocator {
                selector,
                kind,
                attr,
            },
        }
    }
}

/// Per-source token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Burst size and tokens granted per window
    pub capacity: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Which raw-field adapter runs before entity normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Rename fields through `field_aliases`
    #[default]
    Alias,
    /// Alias, then split a combined situs line and default the region
    Assessor,
}

/// Rolling attempt counters for a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub fn record(&mut self, success: bool, at: DateTime<Utc>) {
        if success {
            self.success_count += 1;
            self.last_success_at = Some(at);
        } else {
            self.failure_count += 1;
            self.last_failure_at = Some(at);
        }
    }

    /// Share of successful attempts, `None` before the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.success_count + self.failure_count;
        (total > 0).then(|| self.success_count as f64 / total as f64)
    }
}

/// Static configuration for one external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier (e.g., "la-county-assessor")
    pub id: String,

    /// Display name (e.g., "Los Angeles, CA")
    pub name: String,

    pub base_url: String,

    /// Direct search URL with a `{query}` placeholder, for static sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_url: Option<String>,

    /// Requires a scripted browser session instead of a plain fetch
    #[serde(default)]
    pub needs_interactive_rendering: bool,

    /// Canonical field name to page locator
    #[serde(default)]
    pub locators: BTreeMap<String, FieldLocator>,

    /// Token bucket override; registry defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Sources behind a login are registered but never scraped
    #[serde(default)]
    pub auth_required: bool,

    /// Two-letter region this source covers (e.g., "CA")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,

    /// Postal code prefixes served by this source
    #[serde(default)]
    pub postal_prefixes: Vec<String>,

    /// Entity types this source can produce
    #[serde(default)]
    pub data_types: Vec<EntityType>,

    /// Raw field name to canonical field name
    #[serde(default)]
    pub field_aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub adapter: AdapterKind,

    /// Raw field holding the provider's own record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub stats: SourceStats,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// Whether this source can produce the given entity type.
    pub fn supports(&self, entity_type: EntityType) -> bool {
        self.data_types.contains(&entity_type)
    }

    /// Whether jobs may be dispatched against this source at all.
    pub fn is_scrapable(&self) -> bool {
        self.enabled && !self.auth_required
    }

    /// Length of the longest matching postal prefix.
    pub fn postal_match_len(&self, postal_code: &str) -> Option<usize> {
        self.postal_prefixes
            .iter()
            .filter(|prefix| postal_code.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max()
    }

    /// Whether a URL belongs to this source's host.
    pub fn matches_url(&self, url: &str) -> bool {
        match (get_domain(url), get_domain(&self.base_url)) {
            (Some(a), Some(b)) => a == b || a.ends_with(&format!(".{b}")),
            _ => false,
        }
    }

    /// Build the direct search URL for a query, if the source has one.
    pub fn search_url_for(&self, query: &str) -> Option<String> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.search_url
            .as_ref()
            .map(|template| template.replace("{query}", &encoded))
    }
}

/// Health summary derived from a source's rolling counters.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl From<&SourceConfig> for SourceHealth {
    fn from(source: &SourceConfig) -> Self {
        Self {
            source_id: source.id.clone(),
            name: source.name.clone(),
            success_count: source.stats.success_count,
            failure_count: source.stats.failure_count,
            success_rate: source.stats.success_rate(),
            last_success_at: source.stats.last_success_at,
            last_failure_at: source.stats.last_failure_at,
        }
    }
}
