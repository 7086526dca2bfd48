// src/services/extract.rs

//! Locator-driven field extraction from rendered HTML.

use std::collections::BTreeMap;

use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{FieldKind, FieldLocator, RawExtractionResult};
use crate::utils::{collapse_whitespace, first_number};

/// Parse a CSS selector, mapping failures into [`AppError::Selector`].
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Parse a number out of display text, ignoring currency and separators.
///
/// Only the first numeric run counts. Returns `None` when there are no digits.
pub fn parse_number(text: &str) -> Option<f64> {
    first_number(text)
}

/// Read a single locator from a parsed document.
///
/// An element that is absent, or whose text is blank, yields `None`.
pub fn extract_field(document: &Html, locator: &FieldLocator) -> Result<Option<Value>> {
    let selector = parse_selector(&locator.selector)?;
    let Some(element) = document.select(&selector).next() else {
        return Ok(None);
    };

    let raw = match &locator.attr {
        Some(attr) => element.value().attr(attr).unwrap_or("").to_string(),
        None => element.text().collect::<String>(),
    };
    let text = collapse_whitespace(&raw);
    if text.is_empty() {
        return Ok(None);
    }

    Ok(match locator.kind {
        FieldKind::Text => Some(Value::String(text)),
        FieldKind::Number => parse_number(&text)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
    })
}

/// Read every configured locator; fields that cannot be found are omitted.
pub fn extract_fields(
    html: &str,
    locators: &BTreeMap<String, FieldLocator>,
) -> Result<BTreeMap<String, Value>> {
    let document = Html::parse_document(html);
    let mut fields = BTreeMap::new();
    for (name, locator) in locators {
        if let Some(value) = extract_field(&document, locator)? {
            fields.insert(name.clone(), value);
        }
    }
    Ok(fields)
}

/// Build a raw result for a page.
pub fn extract_page(
    source_id: &str,
    url: &str,
    html: &str,
    locators: &BTreeMap<String, FieldLocator>,
) -> Result<RawExtractionResult> {
    let mut raw = RawExtractionResult::new(source_id, url);
    raw.fields = extract_fields(html, locators)?;
    log::debug!(
        "Extracted {}/{} fields from {}",
        raw.fields.len(),
        locators.len(),
        url
    );
    Ok(raw)
}
