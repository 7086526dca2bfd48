// src/pipeline/normalize/mod.rs

//! Normalization and validation of raw extractions.
//!
//! `raw -> source adapter -> entity normalizer -> scored record`. The
//! normalizer never fails: every problem ends up in the returned
//! [`ValidationResult`] or the transformation log.

pub mod adapter;
pub mod entity;
pub mod fields;
pub mod reader;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::{
    EntityType, NormalizationOutcome, NormalizeConfig, NormalizedRecord, RawExtractionResult,
    RecordData, SourceConfig, ValidationResult,
};

pub use adapter::{AliasAdapter, AssessorAdapter, FieldMap, SourceAdapter, adapter_for};
pub use entity::{EntityNormalizer, normalizer_for};
pub use reader::{Diagnostics, FieldReader};

/// Score a record: start at 1.0, subtract per error and per warning, add a
/// bonus per high-value optional field, clamp to `[0, 1]`.
pub fn confidence(config: &NormalizeConfig, errors: usize, warnings: usize, optional: u32) -> f64 {
    let score = 1.0 - errors as f64 * config.error_penalty - warnings as f64 * config.warning_penalty
        + f64::from(optional) * config.optional_bonus;
    score.clamp(0.0, 1.0)
}

/// Duplicate-detection key: normalized (address, city, region).
pub fn dedup_key(data: &RecordData) -> Option<String> {
    let (address, city, region) = data.location()?;
    let key = [address, city, region]
        .iter()
        .map(|part| crate::utils::collapse_whitespace(part).to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    Some(key)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Natural key within a source: the provider's own id when configured and
/// present, otherwise a hash of the dedup key or of the record itself.
pub fn external_id(source: &SourceConfig, fields: &FieldMap, data: &RecordData) -> String {
    if let Some(id) = source
        .external_id_field
        .as_ref()
        .and_then(|name| fields.get(name))
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }
    match dedup_key(data) {
        Some(key) => sha256_hex(&key),
        None => sha256_hex(&serde_json::to_string(data).unwrap_or_default()),
    }
}

/// Converts raw extractions into scored canonical records.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    /// Normalize one raw result for the given entity type.
    pub fn normalize(
        &self,
        raw: &RawExtractionResult,
        source: &SourceConfig,
        entity_type: EntityType,
    ) -> NormalizationOutcome {
        let mut log = Vec::new();
        let fields = adapter_for(source.adapter).adapt(raw, source, &mut log);

        let mut reader = FieldReader::new(&fields, log);
        let data = normalizer_for(entity_type).normalize(&mut reader);
        let diag = reader.finish();

        let confidence = confidence(
            &self.config,
            diag.errors.len(),
            diag.warnings.len(),
            diag.optional_present,
        );
        let is_valid = diag.errors.is_empty();
        if !is_valid {
            log::debug!(
                "{} record from {} invalid: {}",
                entity_type,
                source.id,
                diag.errors.join("; ")
            );
        }

        let record = NormalizedRecord {
            source_id: source.id.clone(),
            external_id: external_id(source, &fields, &data),
            data,
            confidence,
            is_valid,
            normalized_at: Utc::now(),
        };
        let validation = ValidationResult {
            is_valid,
            errors: diag.errors,
            warnings: diag.warnings,
            missing_required: diag.missing_required,
            confidence,
        };
        NormalizationOutcome {
            record,
            validation,
            log: diag.log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SourceRegistry;

    fn la() -> SourceConfig {
        SourceRegistry::with_defaults()
            .get("la-county-assessor")
            .unwrap()
    }

    fn listings() -> SourceConfig {
        SourceRegistry::with_defaults()
            .get("commercial-listings")
            .unwrap()
    }

    #[test]
    fn test_assessor_record_is_valid() {
        let raw = RawExtractionResult::new("la-county-assessor", "https://portal.assessor.lacounty.gov/")
            .with_field("parcel_id", "4333-001-002")
            .with_field("situs", "123 MAIN ST, BEVERLY HILLS, CA 90210")
            .with_field("assessed_value", 1_850_000.0);
        let outcome = Normalizer::default().normalize(&raw, &la(), EntityType::TaxAssessment);

        assert!(outcome.validation.is_valid, "{:?}", outcome.validation.errors);
        assert!(outcome.record.confidence >= 0.8);
        assert_eq!(outcome.record.external_id, "4333-001-002");
        let RecordData::TaxAssessment(t) = &outcome.record.data else {
            panic!("expected tax assessment");
        };
        assert_eq!(t.assessed_value, Some(1_850_000.0));
        assert_eq!(t.address.as_deref(), Some("123 Main Street"));
        assert_eq!(t.city.as_deref(), Some("BEVERLY HILLS"));
        assert_eq!(t.postal_code.as_ref().unwrap().zip5, "90210");
        assert!(!outcome.log.is_empty());
    }

    #[test]
    fn test_missing_address_is_invalid() {
        let raw = RawExtractionResult::new("commercial-listings", "u")
            .with_field("state", "CA")
            .with_field("list_price", "$2,850,000");
        let outcome = Normalizer::default().normalize(&raw, &listings(), EntityType::Property);

        assert!(!outcome.record.is_valid);
        assert_eq!(outcome.validation.missing_required, vec!["address"]);
        assert!(outcome.record.confidence < 1.0);
    }

    #[test]
    fn test_confidence_monotone_and_clamped() {
        let config = NormalizeConfig::default();
        for errors in 0..8 {
            for warnings in 0..8 {
                let score = confidence(&config, errors, warnings, 3);
                assert!((0.0..=1.0).contains(&score));
                assert!(confidence(&config, errors + 1, warnings, 3) <= score);
                assert!(confidence(&config, errors, warnings + 1, 3) <= score);
            }
        }
        assert_eq!(confidence(&config, 100, 100, 0), 0.0);
        assert_eq!(confidence(&config, 0, 0, 10), 1.0);
    }

    #[test]
    fn test_external_id_falls_back_to_hash() {
        let raw = RawExtractionResult::new("commercial-listings", "u")
            .with_field("address", "1 Main St")
            .with_field("city", "Austin")
            .with_field("state", "TX");
        let a = Normalizer::default().normalize(&raw, &listings(), EntityType::Property);
        let b = Normalizer::default().normalize(&raw, &listings(), EntityType::Property);

        assert_eq!(a.record.external_id.len(), 64);
        assert_eq!(a.record.external_id, b.record.external_id);
        assert_eq!(
            dedup_key(&a.record.data).as_deref(),
            Some("1 main street|austin|tx")
        );
    }

    #[test]
    fn test_aliased_price_is_normalized() {
        let raw = RawExtractionResult::new("commercial-listings", "u")
            .with_field("address", "1 Main St")
            .with_field("state", "TX")
            .with_field("asking_price", "$1.2M");
        let outcome = Normalizer::default().normalize(&raw, &listings(), EntityType::Property);
        let RecordData::Property(p) = &outcome.record.data else {
            panic!("expected property");
        };
        assert_eq!(p.list_price, Some(1_200_000.0));
        assert!(outcome.log.iter().any(|l| l.contains("asking_price")));
    }
}
