// src/pipeline/normalize/entity.rs

//! Per-entity normalizers converging on [`RecordData`].

use chrono::Utc;

use super::fields::per;
use super::reader::FieldReader;
use crate::models::{
    EntityType, MarketDataPointRecord, PropertyRecord, RecordData, ResearchReportRecord,
    TaxAssessmentRecord, TransactionRecord,
};

/// Typical ceilings beyond which a value is suspicious, not invalid.
const MAX_TYPICAL_UNITS: u64 = 5_000;
const MAX_TYPICAL_BUILDING_SF: u64 = 10_000_000;

/// Builds one entity's canonical fields from adapted raw fields.
pub trait EntityNormalizer: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn normalize(&self, reader: &mut FieldReader<'_>) -> RecordData;
}

/// The normalizer for an entity type.
pub fn normalizer_for(entity_type: EntityType) -> &'static dyn EntityNormalizer {
    match entity_type {
        EntityType::Property => &PropertyNormalizer,
        EntityType::TaxAssessment => &TaxAssessmentNormalizer,
        EntityType::ResearchReport => &ResearchReportNormalizer,
        EntityType::Transaction => &TransactionNormalizer,
        EntityType::MarketDataPoint => &MarketDataNormalizer,
    }
}

fn derive_per(
    reader: &mut FieldReader<'_>,
    label: &str,
    price: Option<f64>,
    quantity: Option<u64>,
) -> Option<f64> {
    let value = per(price, quantity);
    if let Some(value) = value {
        reader.note(format!("derived {label} = {value}"));
    }
    value
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyNormalizer;

impl EntityNormalizer for PropertyNormalizer {
    fn entity_type(&self) -> EntityType {
        EntityType::Property
    }

    fn normalize(&self, r: &mut FieldReader<'_>) -> RecordData {
        let address = r.required("address", FieldReader::address);
        let state = r.required("state", FieldReader::region);
        let city = r.text("city");
        let postal_code = r.postal("postal_code");
        let property_type = r.property_type("property_type");
        let list_price = r.optional("list_price", FieldReader::money);
        let units = r.optional("units", FieldReader::units);
        let building_sf = r.optional("building_sf", FieldReader::count);
        let lot_sf = r.count("lot_sf");
        let year_built = r.optional("year_built", FieldReader::year);
        let cap_rate = r.optional("cap_rate", FieldReader::cap_rate);
        let listing_url = r.text("listing_url");

        r.typical_max("units", units.map(u64::from), MAX_TYPICAL_UNITS);
        r.typical_max("building_sf", building_sf, MAX_TYPICAL_BUILDING_SF);
        if list_price.is_some_and(|p| p <= 0.0) {
            r.warn("list_price is not positive");
        }

        let price_per_unit = derive_per(r, "price_per_unit", list_price, units.map(u64::from));
        let price_per_sf = derive_per(r, "price_per_sf", list_price, building_sf);

        RecordData::Property(PropertyRecord {
            address,
            city,
            state,
            postal_code,
            property_type,
            units,
            building_sf,
            lot_sf,
            year_built,
            list_price,
            cap_rate,
            price_per_unit,
            price_per_sf,
            listing_url,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaxAssessmentNormalizer;

impl EntityNormalizer for TaxAssessmentNormalizer {
    fn entity_type(&self) -> EntityType {
        EntityType::TaxAssessment
    }

    fn normalize(&self, r: &mut FieldReader<'_>) -> RecordData {
        let parcel_id = r.optional("parcel_id", FieldReader::text);
        let address = r.required("address", FieldReader::address);
        let city = r.text("city");
        let state = r.region("state");
        let postal_code = r.postal("postal_code");
        let assessed_value = r.required("assessed_value", FieldReader::positive_money);
        let land_value = r.optional("land_value", FieldReader::money);
        let improvement_value = r.optional("improvement_value", FieldReader::money);
        let tax_amount = r.money("tax_amount");
        let tax_year = r.year("tax_year");
        let year_built = r.optional("year_built", FieldReader::year);
        let building_sf = r.optional("building_sf", FieldReader::count);
        let property_type = r.property_type("property_type");

        r.typical_max("building_sf", building_sf, MAX_TYPICAL_BUILDING_SF);
        if let (Some(total), Some(land), Some(improvement)) =
            (assessed_value, land_value, improvement_value)
        {
            if total > 0.0 && ((land + improvement) - total).abs() / total > 0.05 {
                r.warn(format!(
                    "land {land} + improvement {improvement} differs from assessed value {total}"
                ));
            }
        }

        RecordData::TaxAssessment(TaxAssessmentRecord {
            parcel_id,
            address,
            city,
            state,
            postal_code,
            assessed_value,
            land_value,
            improvement_value,
            tax_amount,
            tax_year,
            year_built,
            building_sf,
            property_type,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResearchReportNormalizer;

impl EntityNormalizer for ResearchReportNormalizer {
    fn entity_type(&self) -> EntityType {
        EntityType::ResearchReport
    }

    fn normalize(&self, r: &mut FieldReader<'_>) -> RecordData {
        let title = r.required("title", FieldReader::text);
        let market = r.required("market", FieldReader::text);
        let publisher = r.optional("publisher", FieldReader::text);
        let published_on = r.optional("published_on", FieldReader::date);
        let property_type = r.property_type("property_type");
        let vacancy_rate = r.optional("vacancy_rate", FieldReader::rate);
        let cap_rate = r.optional("cap_rate", FieldReader::cap_rate);
        let avg_rent = r.money("avg_rent");
        let summary = r.text("summary");

        if published_on.is_some_and(|d| d > Utc::now().date_naive()) {
            r.warn("published_on is in the future");
        }

        RecordData::ResearchReport(ResearchReportRecord {
            title,
            publisher,
            market,
            published_on,
            property_type,
            vacancy_rate,
            cap_rate,
            avg_rent,
            summary,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionNormalizer;

impl EntityNormalizer for TransactionNormalizer {
    fn entity_type(&self) -> EntityType {
        EntityType::Transaction
    }

    fn normalize(&self, r: &mut FieldReader<'_>) -> RecordData {
        let address = r.required("address", FieldReader::address);
        let city = r.text("city");
        let state = r.region("state");
        let postal_code = r.postal("postal_code");
        let sale_price = r.required("sale_price", FieldReader::positive_money);
        let sale_date = r.optional("sale_date", FieldReader::date);
        let buyer = r.text("buyer");
        let seller = r.text("seller");
        let property_type = r.property_type("property_type");
        let units = r.optional("units", FieldReader::units);
        let building_sf = r.optional("building_sf", FieldReader::count);
        let year_built = r.year("year_built");
        let cap_rate = r.optional("cap_rate", FieldReader::cap_rate);

        r.typical_max("units", units.map(u64::from), MAX_TYPICAL_UNITS);
        r.typical_max("building_sf", building_sf, MAX_TYPICAL_BUILDING_SF);
        if sale_date.is_some_and(|d| d > Utc::now().date_naive()) {
            r.warn("sale_date is in the future");
        }

        let price_per_unit = derive_per(r, "price_per_unit", sale_price, units.map(u64::from));
        let price_per_sf = derive_per(r, "price_per_sf", sale_price, building_sf);

        RecordData::Transaction(TransactionRecord {
            address,
            city,
            state,
            postal_code,
            sale_price,
            sale_date,
            buyer,
            seller,
            property_type,
            units,
            building_sf,
            year_built,
            cap_rate,
            price_per_unit,
            price_per_sf,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarketDataNormalizer;

impl EntityNormalizer for MarketDataNormalizer {
    fn entity_type(&self) -> EntityType {
        EntityType::MarketDataPoint
    }

    fn normalize(&self, r: &mut FieldReader<'_>) -> RecordData {
        let market = r.required("market", FieldReader::text);
        let metric = r
            .required("metric", FieldReader::text)
            .map(|m| m.to_lowercase().replace(' ', "_"));
        let unit = r.text("unit");

        // Rates are stored as fractions, everything else as a plain number
        let is_rate = unit.as_deref().is_some_and(|u| u == "%" || u.contains("percent"))
            || metric.as_deref().is_some_and(|m| m.ends_with("_rate"));
        let value = if is_rate {
            r.required("value", FieldReader::rate)
        } else {
            r.required("value", FieldReader::money)
        };
        let period = r.optional("period", FieldReader::text);
        let property_type = r.optional("property_type", FieldReader::property_type);

        RecordData::MarketDataPoint(MarketDataPointRecord {
            market,
            metric,
            value,
            period,
            property_type,
            unit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::adapter::FieldMap;

    fn run(entity_type: EntityType, entries: &[(&str, &str)]) -> (RecordData, usize, usize) {
        let fields: FieldMap = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut reader = FieldReader::new(&fields, Vec::new());
        let data = normalizer_for(entity_type).normalize(&mut reader);
        let diag = reader.finish();
        (data, diag.errors.len(), diag.warnings.len())
    }

    #[test]
    fn test_property_derives_ratios() {
        let (data, errors, warnings) = run(
            EntityType::Property,
            &[
                ("address", "250 W 5th St"),
                ("city", "Los Angeles"),
                ("state", "California"),
                ("list_price", "$2,850,000"),
                ("units", "12"),
                ("building_sf", "9,500 SF"),
                ("cap_rate", "5.2%"),
                ("year_built", "1995"),
                ("property_type", "Apartments"),
            ],
        );
        assert_eq!((errors, warnings), (0, 0));

        let RecordData::Property(p) = data else {
            panic!("expected property");
        };
        assert_eq!(p.address.as_deref(), Some("250 West 5th Street"));
        assert_eq!(p.state.as_deref(), Some("CA"));
        assert_eq!(p.list_price, Some(2_850_000.0));
        assert_eq!(p.cap_rate, Some(0.052));
        assert_eq!(p.year_built, Some(1995));
        assert_eq!(p.price_per_unit, Some(237_500.0));
        assert_eq!(p.price_per_sf, Some(300.0));
        assert_eq!(p.property_type.as_deref(), Some("multifamily"));
    }

    #[test]
    fn test_property_price_na_is_warning_only() {
        let (data, errors, warnings) = run(
            EntityType::Property,
            &[("address", "1 Main St"), ("state", "TX"), ("list_price", "N/A")],
        );
        assert_eq!((errors, warnings), (0, 1));
        let RecordData::Property(p) = data else {
            panic!("expected property");
        };
        assert_eq!(p.list_price, None);
    }

    #[test]
    fn test_tax_assessment_value_mismatch_warns() {
        let (_, errors, warnings) = run(
            EntityType::TaxAssessment,
            &[
                ("address", "123 Main St"),
                ("assessed_value", "1850000"),
                ("land_value", "$500,000"),
                ("improvement_value", "$900,000"),
            ],
        );
        assert_eq!((errors, warnings), (0, 1));
    }

    #[test]
    fn test_transaction_requires_positive_price() {
        let (_, errors, _) = run(
            EntityType::Transaction,
            &[("address", "9 Elm St"), ("sale_price", "$0")],
        );
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_market_data_rate_metric() {
        let (data, errors, _) = run(
            EntityType::MarketDataPoint,
            &[
                ("market", "Phoenix"),
                ("metric", "Vacancy Rate"),
                ("value", "7.4%"),
                ("period", "2024Q2"),
            ],
        );
        assert_eq!(errors, 0);
        let RecordData::MarketDataPoint(m) = data else {
            panic!("expected market data");
        };
        assert_eq!(m.metric.as_deref(), Some("vacancy_rate"));
        assert_eq!(m.value, Some(0.074));
    }

    #[test]
    fn test_research_requires_title_and_market() {
        let (_, errors, _) = run(EntityType::ResearchReport, &[("publisher", "Acme")]);
        assert_eq!(errors, 2);
    }
}
