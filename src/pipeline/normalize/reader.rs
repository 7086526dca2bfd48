// src/pipeline/normalize/reader.rs

//! Typed access to adapted fields with error and warning bookkeeping.

use chrono::NaiveDate;

use super::adapter::FieldMap;
use super::fields;
use crate::models::PostalCode;
use crate::utils::collapse_whitespace;

/// Problems and notes gathered while normalizing one record.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_required: Vec<String>,
    pub log: Vec<String>,
    /// High-value optional fields that were present
    pub optional_present: u32,
}

/// Reads canonical fields, recording every parse failure as a warning.
///
/// A value that cannot be parsed is omitted, never raised.
pub struct FieldReader<'a> {
    fields: &'a FieldMap,
    diag: Diagnostics,
}

impl<'a> FieldReader<'a> {
    pub fn new(fields: &'a FieldMap, log: Vec<String>) -> Self {
        Self {
            fields,
            diag: Diagnostics {
                log,
                ..Diagnostics::default()
            },
        }
    }

    pub fn finish(self) -> Diagnostics {
        self.diag
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.diag.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("normalize: {message}");
        self.diag.warnings.push(message);
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.diag.log.push(message.into());
    }

    fn raw(&self, name: &str) -> Option<&'a str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&mut self, name: &str, what: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.raw(name)?;
        match parse(raw) {
            Some(value) => Some(value),
            None => {
                self.warn(format!("{name}: invalid {what} '{raw}', omitted"));
                None
            }
        }
    }

    /// A field that must be present; absence is a hard error.
    pub fn required<T>(
        &mut self,
        name: &str,
        read: impl FnOnce(&mut Self, &str) -> Option<T>,
    ) -> Option<T> {
        let value = read(self, name);
        if value.is_none() {
            self.error(format!("missing required field {name}"));
            self.diag.missing_required.push(name.to_string());
        }
        value
    }

    /// A high-value optional field; presence earns a confidence bonus.
    pub fn optional<T>(
        &mut self,
        name: &str,
        read: impl FnOnce(&mut Self, &str) -> Option<T>,
    ) -> Option<T> {
        let value = read(self, name);
        if value.is_some() {
            self.diag.optional_present += 1;
        }
        value
    }

    pub fn text(&mut self, name: &str) -> Option<String> {
        self.raw(name).map(collapse_whitespace)
    }

    pub fn address(&mut self, name: &str) -> Option<String> {
        let raw = self.raw(name)?;
        let address = fields::normalize_address(raw)?;
        if address != raw {
            self.note(format!("{name}: '{raw}' -> '{address}'"));
        }
        Some(address)
    }

    pub fn region(&mut self, name: &str) -> Option<String> {
        let raw = self.raw(name)?;
        let region = fields::normalize_region(raw)?;
        if region.len() != 2 {
            self.warn(format!("{name}: unrecognized region '{raw}'"));
        } else if region != raw {
            self.note(format!("{name}: '{raw}' -> {region}"));
        }
        Some(region)
    }

    pub fn postal(&mut self, name: &str) -> Option<PostalCode> {
        self.parsed(name, "postal code", fields::parse_postal)
    }

    pub fn money(&mut self, name: &str) -> Option<f64> {
        self.parsed(name, "amount", fields::parse_money)
    }

    /// Money that must be positive; a non-positive amount is a hard error.
    pub fn positive_money(&mut self, name: &str) -> Option<f64> {
        let value = self.money(name)?;
        if value <= 0.0 {
            self.error(format!("{name} must be positive, got {value}"));
        }
        Some(value)
    }

    pub fn rate(&mut self, name: &str) -> Option<f64> {
        self.parsed(name, "rate", fields::parse_rate)
    }

    /// A cap-rate-like rate; values outside (0, 1) are a warning.
    pub fn cap_rate(&mut self, name: &str) -> Option<f64> {
        let value = self.rate(name)?;
        if value <= 0.0 || value >= 1.0 {
            self.warn(format!("{name}: {value} outside (0, 1)"));
        }
        Some(value)
    }

    pub fn count(&mut self, name: &str) -> Option<u64> {
        self.parsed(name, "count", fields::parse_count)
    }

    pub fn units(&mut self, name: &str) -> Option<u32> {
        let count = self.count(name)?;
        match u32::try_from(count) {
            Ok(units) => Some(units),
            Err(_) => {
                self.warn(format!("{name}: {count} out of range, omitted"));
                None
            }
        }
    }

    pub fn year(&mut self, name: &str) -> Option<i32> {
        self.parsed(name, "year", fields::parse_year)
    }

    pub fn date(&mut self, name: &str) -> Option<NaiveDate> {
        self.parsed(name, "date", fields::parse_date)
    }

    pub fn property_type(&mut self, name: &str) -> Option<String> {
        let raw = self.raw(name)?;
        let canonical = fields::normalize_property_type(raw)?;
        if fields::PROPERTY_TYPES.contains(&canonical.as_str()) {
            self.note(format!("{name}: '{raw}' -> {canonical}"));
        } else {
            self.note(format!("{name}: '{raw}' unmapped"));
        }
        Some(canonical)
    }

    /// Warn when a value exceeds a typical ceiling.
    pub fn typical_max(&mut self, name: &str, value: Option<u64>, max: u64) {
        if let Some(value) = value.filter(|v| *v > max) {
            self.warn(format!("{name}: {value} exceeds typical maximum {max}"));
        }
    }
}
