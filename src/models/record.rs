// src/models/record.rs

//! Raw extraction results and the canonical record schema.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical entity families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Property,
    TaxAssessment,
    ResearchReport,
    Transaction,
    MarketDataPoint,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Property => "property",
            EntityType::TaxAssessment => "tax_assessment",
            EntityType::ResearchReport => "research_report",
            EntityType::Transaction => "transaction",
            EntityType::MarketDataPoint => "market_data_point",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Field values read from one page, keyed by canonical field name.
///
/// Ephemeral: handed straight to the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExtractionResult {
    pub source_id: String,
    pub url: String,
    pub fields: BTreeMap<String, Value>,
    pub extracted_at: DateTime<Utc>,
}

impl RawExtractionResult {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            fields: BTreeMap::new(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value rendered as trimmed text; empty strings count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        let text = match self.fields.get(name)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => return None,
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Outcome of validating one normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Hard problems; any error invalidates the record
    pub errors: Vec<String>,
    /// Soft problems; reduce confidence only
    pub warnings: Vec<String>,
    /// Required fields that were absent after normalization
    #[serde(default)]
    pub missing_required: Vec<String>,
    pub confidence: f64,
}

/// Canonical postal code, five digits plus an optional +4 extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalCode {
    pub zip5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus4: Option<String>,
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plus4 {
            Some(ext) => write!(f, "{}-{}", self.zip5, ext),
            None => f.write_str(&self.zip5),
        }
    }
}

/// A marketed property (brokerage listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<PostalCode>,
    pub property_type: Option<String>,
    pub units: Option<u32>,
    pub building_sf: Option<u64>,
    pub lot_sf: Option<u64>,
    pub year_built: Option<i32>,
    pub list_price: Option<f64>,
    pub cap_rate: Option<f64>,
    pub price_per_unit: Option<f64>,
    pub price_per_sf: Option<f64>,
    pub listing_url: Option<String>,
}

/// One parcel's assessor roll entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxAssessmentRecord {
    pub parcel_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<PostalCode>,
    pub assessed_value: Option<f64>,
    pub land_value: Option<f64>,
    pub improvement_value: Option<f64>,
    pub tax_amount: Option<f64>,
    pub tax_year: Option<i32>,
    pub year_built: Option<i32>,
    pub building_sf: Option<u64>,
    pub property_type: Option<String>,
}

/// A market research publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReportRecord {
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub market: Option<String>,
    pub published_on: Option<NaiveDate>,
    pub property_type: Option<String>,
    pub vacancy_rate: Option<f64>,
    pub cap_rate: Option<f64>,
    pub avg_rent: Option<f64>,
    pub summary: Option<String>,
}

/// A closed comparable sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<PostalCode>,
    pub sale_price: Option<f64>,
    pub sale_date: Option<NaiveDate>,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub property_type: Option<String>,
    pub units: Option<u32>,
    pub building_sf: Option<u64>,
    pub year_built: Option<i32>,
    pub cap_rate: Option<f64>,
    pub price_per_unit: Option<f64>,
    pub price_per_sf: Option<f64>,
}

/// A single market statistic observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPointRecord {
    pub market: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub period: Option<String>,
    pub property_type: Option<String>,
    pub unit: Option<String>,
}

/// Entity-specific canonical fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum RecordData {
    Property(PropertyRecord),
    TaxAssessment(TaxAssessmentRecord),
    ResearchReport(ResearchReportRecord),
    Transaction(TransactionRecord),
    MarketDataPoint(MarketDataPointRecord),
}

impl RecordData {
    pub fn entity_type(&self) -> EntityType {
        match self {
            RecordData::Property(_) => EntityType::Property,
            RecordData::TaxAssessment(_) => EntityType::TaxAssessment,
            RecordData::ResearchReport(_) => EntityType::ResearchReport,
            RecordData::Transaction(_) => EntityType::Transaction,
            RecordData::MarketDataPoint(_) => EntityType::MarketDataPoint,
        }
    }

    /// Location triple used for duplicate detection, where the entity has one.
    pub fn location(&self) -> Option<(&str, &str, &str)> {
        let (address, city, state) = match self {
            RecordData::Property(r) => (&r.address, &r.city, &r.state),
            RecordData::TaxAssessment(r) => (&r.address, &r.city, &r.state),
            RecordData::Transaction(r) => (&r.address, &r.city, &r.state),
            RecordData::ResearchReport(_) | RecordData::MarketDataPoint(_) => return None,
        };
        Some((
            address.as_deref()?,
            city.as_deref().unwrap_or(""),
            state.as_deref().unwrap_or(""),
        ))
    }
}

/// A validated record in the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source_id: String,
    /// Natural key within the source
    pub external_id: String,
    pub data: RecordData,
    pub confidence: f64,
    pub is_valid: bool,
    pub normalized_at: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }
}

/// Everything the normalizer produces for one raw result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationOutcome {
    pub record: NormalizedRecord,
    pub validation: ValidationResult,
    /// Ordered notes on each transformation applied
    pub log: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_text_treats_blank_as_absent() {
        let raw = RawExtractionResult::new("src", "https://example.com")
            .with_field("address", "   ")
            .with_field("assessed_value", 1_850_000.0)
            .with_field("owner", Value::Null);
        assert_eq!(raw.text("address"), None);
        assert_eq!(raw.text("assessed_value").as_deref(), Some("1850000.0"));
        assert_eq!(raw.text("owner"), None);
        assert_eq!(raw.text("missing"), None);
    }

    #[test]
    fn test_postal_display() {
        let zip = PostalCode {
            zip5: "90210".into(),
            plus4: Some("1234".into()),
        };
        assert_eq!(zip.to_string(), "90210-1234");
    }

    #[test]
    fn test_location_requires_address() {
        let data = RecordData::TaxAssessment(TaxAssessmentRecord {
            parcel_id: None,
            address: None,
            city: Some("Los Angeles".into()),
            state: Some("CA".into()),
            postal_code: None,
            assessed_value: None,
            land_value: None,
            improvement_value: None,
            tax_amount: None,
            tax_year: None,
            year_built: None,
            building_sf: None,
            property_type: None,
        });
        assert!(data.location().is_none());
    }
}
