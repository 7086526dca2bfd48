// src/pipeline/normalize/adapter.rs

//! Source adapters: raw provider field names to canonical names.

use std::collections::BTreeMap;

use crate::models::{AdapterKind, RawExtractionResult, SourceConfig};
use crate::pipeline::normalize::fields::split_situs;

/// Raw values as trimmed text, keyed by canonical field name.
pub type FieldMap = BTreeMap<String, String>;

/// Reshapes one source's raw fields into canonical field names.
pub trait SourceAdapter: Send + Sync {
    /// Returns the adapted fields; every rename or split is noted in `log`.
    fn adapt(
        &self,
        raw: &RawExtractionResult,
        source: &SourceConfig,
        log: &mut Vec<String>,
    ) -> FieldMap;
}

/// Renames fields through the source's `field_aliases`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasAdapter;

impl SourceAdapter for AliasAdapter {
    fn adapt(
        &self,
        raw: &RawExtractionResult,
        source: &SourceConfig,
        log: &mut Vec<String>,
    ) -> FieldMap {
        let mut fields = FieldMap::new();
        let mut aliased = Vec::new();

        for name in raw.fields.keys() {
            let Some(value) = raw.text(name) else {
                continue;
            };
            match source.field_aliases.get(name) {
                Some(canonical) => aliased.push((name.clone(), canonical.clone(), value)),
                None => {
                    fields.insert(name.clone(), value);
                }
            }
        }

        // A canonical field read directly wins over an aliased one
        for (name, canonical, value) in aliased {
            if fields.contains_key(&canonical) {
                log.push(format!("alias {name} -> {canonical}: skipped, already present"));
            } else {
                log.push(format!("alias {name} -> {canonical}"));
                fields.insert(canonical, value);
            }
        }
        fields
    }
}

/// Assessor rolls print one combined situs line and rarely the state.
///
/// Splits `situs` into address, city, state and postal code where those are
/// not read separately, and defaults the state to the source jurisdiction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssessorAdapter;

impl SourceAdapter for AssessorAdapter {
    fn adapt(
        &self,
        raw: &RawExtractionResult,
        source: &SourceConfig,
        log: &mut Vec<String>,
    ) -> FieldMap {
        let mut fields = AliasAdapter.adapt(raw, source, log);

        if let Some(situs) = fields.remove("situs") {
            let parts = split_situs(&situs);
            for (name, value) in [
                ("address", parts.address),
                ("city", parts.city),
                ("state", parts.region),
                ("postal_code", parts.postal_code),
            ] {
                if let Some(value) = value {
                    if !fields.contains_key(name) {
                        log.push(format!("situs -> {name}: {value}"));
                        fields.insert(name.to_string(), value);
                    }
                }
            }
        }

        if !fields.contains_key("state") {
            if let Some(region) = &source.jurisdiction {
                log.push(format!("state defaulted to jurisdiction {region}"));
                fields.insert("state".to_string(), region.clone());
            }
        }
        fields
    }
}

/// The adapter configured for a source.
pub fn adapter_for(kind: AdapterKind) -> &'static dyn SourceAdapter {
    match kind {
        AdapterKind::Alias => &AliasAdapter,
        AdapterKind::Assessor => &AssessorAdapter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(adapter: &str) -> SourceConfig {
        toml::from_str(&format!(
            r#"
            id = "test"
            name = "Test"
            base_url = "https://example.gov"
            jurisdiction = "CA"
            adapter = "{adapter}"

            [field_aliases]
            asking_price = "list_price"
            ain = "parcel_id"
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_alias_renames_fields() {
        let raw = RawExtractionResult::new("test", "https://example.gov/1")
            .with_field("asking_price", "$1,200,000")
            .with_field("address", "1 Main St")
            .with_field("blank", " ");
        let mut log = Vec::new();
        let fields = AliasAdapter.adapt(&raw, &source("alias"), &mut log);

        assert_eq!(fields["list_price"], "$1,200,000");
        assert!(!fields.contains_key("asking_price"));
        assert!(!fields.contains_key("blank"));
        assert_eq!(log, vec!["alias asking_price -> list_price"]);
    }

    #[test]
    fn test_direct_field_beats_alias() {
        let raw = RawExtractionResult::new("test", "u")
            .with_field("asking_price", "$1")
            .with_field("list_price", "$2");
        let mut log = Vec::new();
        let fields = AliasAdapter.adapt(&raw, &source("alias"), &mut log);
        assert_eq!(fields["list_price"], "$2");
    }

    #[test]
    fn test_assessor_splits_situs() {
        let raw = RawExtractionResult::new("test", "u")
            .with_field("ain", "4333-001-002")
            .with_field("situs", "123 Main St, Beverly Hills, CA 90210");
        let mut log = Vec::new();
        let fields = adapter_for(AdapterKind::Assessor).adapt(&raw, &source("assessor"), &mut log);

        assert_eq!(fields["parcel_id"], "4333-001-002");
        assert_eq!(fields["address"], "123 Main St");
        assert_eq!(fields["city"], "Beverly Hills");
        assert_eq!(fields["state"], "CA");
        assert_eq!(fields["postal_code"], "90210");
        assert!(!fields.contains_key("situs"));
    }

    #[test]
    fn test_assessor_defaults_state() {
        let raw = RawExtractionResult::new("test", "u").with_field("situs", "500 Elm Ave");
        let mut log = Vec::new();
        let fields = AssessorAdapter.adapt(&raw, &source("assessor"), &mut log);

        assert_eq!(fields["address"], "500 Elm Ave");
        assert_eq!(fields["state"], "CA");
        assert!(log.iter().any(|l| l.contains("jurisdiction")));
    }
}
