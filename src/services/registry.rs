// src/services/registry.rs

//! Source registry: which external source serves which target.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{EntityType, SourceConfig, SourceHealth, TargetRef, TrackedEntity};

/// On-disk layout of `sources.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFile {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Registered sources keyed by id.
///
/// Configuration is read-only to the executor; only the rolling attempt
/// counters change after initialization (plus operator upserts).
#[derive(Debug)]
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, SourceConfig>>,
}

impl SourceRegistry {
    /// Build a registry, rejecting invalid or duplicate sources.
    pub fn new(sources: Vec<SourceConfig>) -> Result<Self> {
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.id.clone()) {
                return Err(AppError::config(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            validate_source(source)?;
        }
        Ok(Self {
            sources: RwLock::new(sources.into_iter().map(|s| (s.id.clone(), s)).collect()),
        })
    }

    /// Registry populated with the built-in sources.
    pub fn with_defaults() -> Self {
        Self {
            sources: RwLock::new(
                defaults::sources()
                    .into_iter()
                    .map(|s| (s.id.clone(), s))
                    .collect(),
            ),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, SourceConfig>> {
        self.sources.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SourceConfig>> {
        self.sources.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<SourceConfig> {
        self.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<SourceConfig> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Add or replace a source (operator update). Counters are preserved.
    pub fn upsert(&self, mut source: SourceConfig) -> Result<()> {
        validate_source(&source)?;
        let mut sources = self.write();
        if let Some(existing) = sources.get(&source.id) {
            source.stats = existing.stats.clone();
        }
        sources.insert(source.id.clone(), source);
        Ok(())
    }

    /// Record the outcome of one extraction attempt.
    pub fn record_attempt(&self, source_id: &str, success: bool) {
        if let Some(source) = self.write().get_mut(source_id) {
            source.stats.record(success, Utc::now());
        }
    }

    /// Per-source attempt health.
    pub fn health(&self) -> Vec<SourceHealth> {
        self.read().values().map(SourceHealth::from).collect()
    }

    /// Source serving a postal code, preferring the longest prefix match.
    pub fn resolve_postal(&self, postal_code: &str, entity_type: EntityType) -> Option<SourceConfig> {
        let digits: String = postal_code.chars().filter(|c| c.is_ascii_digit()).collect();
        self.read()
            .values()
            .filter(|s| s.is_scrapable() && s.supports(entity_type))
            .filter_map(|s| s.postal_match_len(&digits).map(|len| (len, s)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, s)| s.clone())
    }

    /// Source hosting a URL.
    pub fn resolve_url(&self, url: &str, entity_type: EntityType) -> Option<SourceConfig> {
        self.read()
            .values()
            .find(|s| s.is_scrapable() && s.supports(entity_type) && s.matches_url(url))
            .cloned()
    }

    /// Source for an explicit id, if it can serve the entity type.
    pub fn resolve_id(&self, id: &str, entity_type: EntityType) -> Option<SourceConfig> {
        self.read()
            .get(id)
            .filter(|s| s.is_scrapable() && s.supports(entity_type))
            .cloned()
    }

    /// Source covering a tracked entity: explicit source, then link host,
    /// then postal code, then region.
    pub fn resolve_entity(&self, entity: &TrackedEntity) -> Option<SourceConfig> {
        let entity_type = entity.entity_type;
        if let Some(id) = &entity.source_id {
            return self.resolve_id(id, entity_type);
        }
        if let Some(found) = entity
            .url
            .as_deref()
            .and_then(|url| self.resolve_url(url, entity_type))
        {
            return Some(found);
        }
        if let Some(found) = entity
            .postal_code
            .as_deref()
            .and_then(|zip| self.resolve_postal(zip, entity_type))
        {
            return Some(found);
        }
        let region = entity.region.as_deref()?.to_uppercase();
        self.read()
            .values()
            .find(|s| {
                s.is_scrapable()
                    && s.supports(entity_type)
                    && s.jurisdiction.as_deref() == Some(region.as_str())
            })
            .cloned()
    }

    /// Source for a job target. Entity targets need the entity record.
    pub fn resolve(
        &self,
        target: &TargetRef,
        entity_type: EntityType,
        entity: Option<&TrackedEntity>,
    ) -> Option<SourceConfig> {
        match target {
            TargetRef::Url(url) => self.resolve_url(url, entity_type),
            TargetRef::PostalCode(code) => self.resolve_postal(code, entity_type),
            TargetRef::Entity(_) => entity.and_then(|e| self.resolve_entity(e)),
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Check a source definition for basic sanity.
pub fn validate_source(source: &SourceConfig) -> Result<()> {
    if source.id.trim().is_empty() {
        return Err(AppError::config("source id is empty"));
    }
    url::Url::parse(&source.base_url)?;
    if let Some(template) = &source.search_url {
        if !template.contains("{query}") {
            return Err(AppError::config(format!(
                "source '{}': search_url has no {{query}} placeholder",
                source.id
            )));
        }
    }
    for (field, locator) in &source.locators {
        Selector::parse(&locator.selector).map_err(|e| {
            AppError::selector(
                locator.selector.clone(),
                format!("field '{field}' of source '{}': {e:?}", source.id),
            )
        })?;
    }
    if let Some(limit) = source.rate_limit {
        if limit.capacity == 0 || limit.window_secs == 0 {
            return Err(AppError::config(format!(
                "source '{}': rate limit must have non-zero capacity and window",
                source.id
            )));
        }
    }
    Ok(())
}

mod defaults {
    use std::collections::BTreeMap;

    use crate::models::{
        AdapterKind, EntityType, FieldLocator, RateLimitConfig, SourceConfig, SourceStats,
    };

    fn locators(entries: &[(&str, FieldLocator)]) -> BTreeMap<String, FieldLocator> {
        entries
            .iter()
            .map(|(name, loc)| (name.to_string(), loc.clone()))
            .collect()
    }

    fn prefixes(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    fn assessor(
        id: &str,
        name: &str,
        base_url: &str,
        jurisdiction: &str,
        postal_prefixes: &[&str],
    ) -> SourceConfig {
        SourceConfig {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            search_url: None,
            needs_interactive_rendering: true,
            locators: BTreeMap::new(),
            rate_limit: Some(RateLimitConfig {
                capacity: 6,
                window_secs: 60,
            }),
            auth_required: false,
            jurisdiction: Some(jurisdiction.into()),
            postal_prefixes: prefixes(postal_prefixes),
            data_types: vec![EntityType::TaxAssessment],
            field_aliases: BTreeMap::new(),
            adapter: AdapterKind::Assessor,
            external_id_field: Some("parcel_id".into()),
            enabled: true,
            stats: SourceStats::default(),
        }
    }

    pub fn sources() -> Vec<SourceConfig> {
        let mut la = assessor(
            "la-county-assessor",
            "Los Angeles, CA",
            "https://portal.assessor.lacounty.gov/",
            "CA",
            &[
                "900", "901", "902", "903", "904", "905", "906", "907", "908", "910", "911",
                "912", "913", "914", "915", "916", "917", "918", "935",
            ],
        );
        la.locators = locators(&[
            ("parcel_id", FieldLocator::text("#ain")),
            ("situs", FieldLocator::text(".property-address")),
            ("property_type", FieldLocator::text("#use-type")),
            ("assessed_value", FieldLocator::number("#total-value")),
            ("land_value", FieldLocator::number("#land-value")),
            ("improvement_value", FieldLocator::number("#improvement-value")),
            ("year_built", FieldLocator::text("#year-built")),
            ("building_sf", FieldLocator::number("#building-sqft")),
            ("tax_year", FieldLocator::text("#roll-year")),
        ]);

        let mut cook = assessor(
            "cook-county-assessor",
            "Cook County, IL",
            "https://www.cookcountyassessor.com/",
            "IL",
            &["600", "601", "604", "605", "606", "607", "608"],
        );
        cook.locators = locators(&[
            ("parcel_id", FieldLocator::text(".pin-number")),
            ("address", FieldLocator::text(".property-street")),
            ("city", FieldLocator::text(".property-city")),
            ("postal_code", FieldLocator::text(".property-zip")),
            ("property_type", FieldLocator::text(".property-class-description")),
            ("assessed_value", FieldLocator::number(".total-assessed-value")),
            ("land_value", FieldLocator::number(".land-assessed-value")),
            ("improvement_value", FieldLocator::number(".building-assessed-value")),
            ("building_sf", FieldLocator::number(".building-sq-ft")),
            ("year_built", FieldLocator::text(".year-built")),
        ]);

        let mut harris = assessor(
            "harris-county-appraisal",
            "Harris County, TX",
            "https://hcad.org/property-search/",
            "TX",
            &["770", "772", "773", "774", "775"],
        );
        harris.locators = locators(&[
            ("parcel_id", FieldLocator::text("td.account-number")),
            ("situs", FieldLocator::text("td.property-address")),
            ("assessed_value", FieldLocator::number("td.appraised-value")),
            ("land_value", FieldLocator::number("td.land-market-value")),
            ("improvement_value", FieldLocator::number("td.improvement-market-value")),
            ("year_built", FieldLocator::text("td.year-built")),
            ("building_sf", FieldLocator::number("td.living-area")),
        ]);

        let mut king = assessor(
            "king-county-assessor",
            "King County, WA",
            "https://blue.kingcounty.com/Assessor/eRealProperty/",
            "WA",
            &["980", "981"],
        );
        king.needs_interactive_rendering = false;
        king.search_url = Some(
            "https://blue.kingcounty.com/Assessor/eRealProperty/Dashboard.aspx?ParcelNbr={query}"
                .into(),
        );
        king.locators = locators(&[
            ("parcel_id", FieldLocator::text("#cphContent_DetailsViewParcel td:nth-child(2)")),
            ("situs", FieldLocator::text("#cphContent_DetailsViewParcel tr:nth-child(3) td:nth-child(2)")),
            ("assessed_value", FieldLocator::number("#cphContent_GridViewTaxRoll tr:nth-child(2) td:nth-child(11)")),
            ("land_value", FieldLocator::number("#cphContent_GridViewTaxRoll tr:nth-child(2) td:nth-child(9)")),
            ("improvement_value", FieldLocator::number("#cphContent_GridViewTaxRoll tr:nth-child(2) td:nth-child(10)")),
            ("year_built", FieldLocator::text("#cphContent_DetailsViewBuilding tr:nth-child(4) td:nth-child(2)")),
        ]);

        let listings = SourceConfig {
            id: "commercial-listings".into(),
            name: "Commercial Listings".into(),
            base_url: "https://listings.example-brokerage.com/".into(),
            search_url: Some("https://listings.example-brokerage.com/search?q={query}".into()),
            needs_interactive_rendering: false,
            locators: locators(&[
                ("listing_id", FieldLocator::text("[data-listing-id]")),
                ("address", FieldLocator::text(".listing-address .street")),
                ("city", FieldLocator::text(".listing-address .city")),
                ("state", FieldLocator::text(".listing-address .state")),
                ("postal_code", FieldLocator::text(".listing-address .zip")),
                ("property_type", FieldLocator::text(".listing-type")),
                ("list_price", FieldLocator::text(".listing-price")),
                ("units", FieldLocator::number(".listing-units")),
                ("building_sf", FieldLocator::number(".listing-building-size")),
                ("lot_sf", FieldLocator::number(".listing-lot-size")),
                ("year_built", FieldLocator::text(".listing-year-built")),
                ("cap_rate", FieldLocator::text(".listing-cap-rate")),
            ]),
            rate_limit: Some(RateLimitConfig {
                capacity: 20,
                window_secs: 60,
            }),
            auth_required: false,
            jurisdiction: None,
            postal_prefixes: Vec::new(),
            data_types: vec![EntityType::Property, EntityType::Transaction],
            field_aliases: BTreeMap::from([
                ("asking_price".to_string(), "list_price".to_string()),
                ("sold_price".to_string(), "sale_price".to_string()),
            ]),
            adapter: AdapterKind::Alias,
            external_id_field: Some("listing_id".into()),
            enabled: true,
            stats: SourceStats::default(),
        };

        let research = SourceConfig {
            id: "market-research".into(),
            name: "Market Research Reports".into(),
            base_url: "https://research.example-advisors.com/".into(),
            search_url: None,
            needs_interactive_rendering: false,
            locators: locators(&[
                ("title", FieldLocator::text("h1.report-title")),
                ("publisher", FieldLocator::text(".report-publisher")),
                ("market", FieldLocator::text(".report-market")),
                ("published_on", FieldLocator::text("time.report-date")),
                ("property_type", FieldLocator::text(".report-sector")),
                ("vacancy_rate", FieldLocator::text(".stat-vacancy")),
                ("cap_rate", FieldLocator::text(".stat-cap-rate")),
                ("avg_rent", FieldLocator::text(".stat-asking-rent")),
                ("summary", FieldLocator::text(".report-summary")),
            ]),
            rate_limit: None,
            auth_required: false,
            jurisdiction: None,
            postal_prefixes: Vec::new(),
            data_types: vec![EntityType::ResearchReport, EntityType::MarketDataPoint],
            field_aliases: BTreeMap::new(),
            adapter: AdapterKind::Alias,
            external_id_field: None,
            enabled: true,
            stats: SourceStats::default(),
        };

        let subscription = SourceConfig {
            id: "subscription-comps".into(),
            name: "Subscription Comparable Sales".into(),
            base_url: "https://comps.example-data.com/".into(),
            search_url: None,
            needs_interactive_rendering: true,
            locators: BTreeMap::new(),
            rate_limit: None,
            auth_required: true,
            jurisdiction: None,
            postal_prefixes: Vec::new(),
            data_types: vec![EntityType::Transaction],
            field_aliases: BTreeMap::new(),
            adapter: AdapterKind::Alias,
            external_id_field: None,
            enabled: true,
            stats: SourceStats::default(),
        };

        vec![la, cook, harris, king, listings, research, subscription]
    }
}
