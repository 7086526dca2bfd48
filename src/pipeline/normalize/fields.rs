// src/pipeline/normalize/fields.rs

//! Field-level parsers shared by every entity normalizer.
//!
//! Parsers are total: malformed input yields `None`, never an error.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::models::PostalCode;
use crate::utils::{collapse_whitespace, first_number};

/// Earliest plausible construction year.
pub const MIN_YEAR_BUILT: i32 = 1800;

/// Canonical property types.
pub const PROPERTY_TYPES: &[&str] = &[
    "multifamily",
    "office",
    "retail",
    "industrial",
    "hospitality",
    "mixed_use",
    "land",
];

const DIRECTIONALS: &[(&str, &str)] = &[
    ("n", "North"),
    ("s", "South"),
    ("e", "East"),
    ("w", "West"),
    ("ne", "Northeast"),
    ("nw", "Northwest"),
    ("se", "Southeast"),
    ("sw", "Southwest"),
];

const STREET_SUFFIXES: &[(&str, &str)] = &[
    ("st", "Street"),
    ("ave", "Avenue"),
    ("av", "Avenue"),
    ("blvd", "Boulevard"),
    ("rd", "Road"),
    ("dr", "Drive"),
    ("ln", "Lane"),
    ("ct", "Court"),
    ("pl", "Place"),
    ("pkwy", "Parkway"),
    ("hwy", "Highway"),
    ("fwy", "Freeway"),
    ("ter", "Terrace"),
    ("cir", "Circle"),
    ("sq", "Square"),
    ("trl", "Trail"),
    ("wy", "Way"),
    ("expy", "Expressway"),
];

const UNIT_DESIGNATORS: &[(&str, &str)] = &[
    ("ste", "Suite"),
    ("apt", "Apartment"),
    ("unit", "Unit"),
];

const STATES: &[(&str, &str)] = &[
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("district of columbia", "DC"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
];

/// Provider vocabulary to canonical type. Multi-word keys match as phrases,
/// single words match whole tokens; earlier rows win.
const PROPERTY_TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("mixed_use", &["mixed use", "mixed", "live work", "retail residential"]),
    (
        "multifamily",
        &[
            "multifamily",
            "multi family",
            "apartment",
            "apartments",
            "residential income",
            "duplex",
            "triplex",
            "fourplex",
            "quadplex",
            "5+ units",
            "garden",
            "midrise",
            "highrise",
            "senior housing",
            "student housing",
        ],
    ),
    (
        "hospitality",
        &["hotel", "motel", "hospitality", "inn", "resort", "lodging"],
    ),
    (
        "industrial",
        &[
            "industrial",
            "warehouse",
            "distribution",
            "manufacturing",
            "flex",
            "logistics",
            "cold storage",
            "self storage",
        ],
    ),
    (
        "office",
        &["office", "medical office", "professional building", "coworking"],
    ),
    (
        "retail",
        &[
            "retail",
            "shopping",
            "strip center",
            "restaurant",
            "store",
            "storefront",
            "net lease",
            "mall",
        ],
    ),
    (
        "land",
        &["land", "vacant", "lot", "agricultural", "acreage", "development site"],
    ),
];

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn money_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &PATTERN,
        r"(?i)(-?\d[\d,]*(?:\.\d+)?|-?\.\d+)\s*(billion|bn|million|mil|mm|m|thousand|k)?\b",
    )
}

fn region_postal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    cached(
        &PATTERN,
        r"(?i)^(?P<region>[a-z][a-z .]*?)\.?\s*(?P<zip>\d{5}(?:-?\d{4})?)?$",
    )
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Parse the first number in the text.
pub fn parse_decimal(text: &str) -> Option<f64> {
    first_number(text)
}

/// Parse a monetary amount, honoring million/thousand suffixes.
///
/// `"$2,850,000"` -> 2850000, `"$2.85M"` -> 2850000, `"N/A"` -> None.
pub fn parse_money(text: &str) -> Option<f64> {
    let caps = money_pattern()?.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_lowercase()).as_deref() {
        Some("billion" | "bn") => 1e9,
        Some("million" | "mil" | "mm" | "m") => 1e6,
        Some("thousand" | "k") => 1e3,
        _ => 1.0,
    };
    Some(round_to(number * multiplier, 2))
}

/// Parse a rate; whole percentages (magnitude above 1) are divided by 100.
///
/// `"5.2%"` -> 0.052, `"0.061"` -> 0.061.
pub fn parse_rate(text: &str) -> Option<f64> {
    let value = parse_decimal(text)?;
    let value = if value.abs() > 1.0 { value / 100.0 } else { value };
    Some(round_to(value, 6))
}

/// Parse a non-negative whole quantity (units, square feet).
///
/// Fractional values are rejected rather than rounded.
pub fn parse_count(text: &str) -> Option<u64> {
    let value = parse_decimal(text)?;
    (value >= 0.0 && value.is_finite() && value.fract() == 0.0).then_some(value as u64)
}

/// Parse a construction year within `[1800, current year]`.
pub fn parse_year(text: &str) -> Option<i32> {
    let value = parse_decimal(text)?;
    if value.fract() != 0.0 {
        return None;
    }
    let year = value as i32;
    (MIN_YEAR_BUILT..=Utc::now().year()).contains(&year).then_some(year)
}

/// Parse a calendar date in one of the formats sources commonly print.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = collapse_whitespace(text);
    const FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
}

/// Normalize a postal code to five digits plus an optional +4 extension.
pub fn parse_postal(text: &str) -> Option<PostalCode> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        // Leading zeros are commonly lost when codes pass through spreadsheets
        3 | 4 => Some(PostalCode {
            zip5: format!("{digits:0>5}"),
            plus4: None,
        }),
        5 => Some(PostalCode {
            zip5: digits,
            plus4: None,
        }),
        9 => Some(PostalCode {
            zip5: digits[..5].to_string(),
            plus4: Some(digits[5..].to_string()),
        }),
        _ => None,
    }
}

/// Map a state name or abbreviation to its two-letter code.
///
/// Unknown values pass through uppercased.
pub fn normalize_region(text: &str) -> Option<String> {
    let cleaned = collapse_whitespace(&text.replace('.', ""));
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_lowercase();
    let code = STATES
        .iter()
        .find(|(name, code)| *name == lower || code.eq_ignore_ascii_case(&lower))
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| cleaned.to_uppercase());
    Some(code)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(abbr, _)| *abbr == key).map(|(_, full)| *full)
}

fn is_unit_designator(key: &str) -> bool {
    key.starts_with('#') || lookup(UNIT_DESIGNATORS, key).is_some()
}

/// Collapse whitespace and expand abbreviations by position.
///
/// Directionals expand only right after the house number or at the end of
/// the street line, street suffixes only as the last street word (before a
/// trailing directional), and unit designators only where the unit begins.
/// `"St Charles Ave Apt E"` -> `"St Charles Avenue Apartment E"`.
/// All-caps words (common in assessor rolls) are title-cased.
pub fn normalize_address(text: &str) -> Option<String> {
    let cleaned = collapse_whitespace(text);
    let cleaned = cleaned.trim_matches(|c: char| c == ',' || c == ';');
    if cleaned.is_empty() {
        return None;
    }

    let tokens: Vec<(&str, &str)> = cleaned
        .split(' ')
        .map(|word| match word.strip_suffix(',') {
            Some(core) => (core, ","),
            None => (word, ""),
        })
        .collect();
    let keys: Vec<String> = tokens
        .iter()
        .map(|(core, _)| core.trim_end_matches('.').to_lowercase())
        .collect();

    // The street line ends at the first comma or unit designator
    let street_end = (1..tokens.len())
        .find(|&i| tokens[i - 1].1 == "," || is_unit_designator(&keys[i]))
        .unwrap_or(tokens.len());
    let name_start = usize::from(tokens[0].0.starts_with(|c: char| c.is_ascii_digit()));
    let last = street_end - 1;
    let trailing_directional = last > name_start && lookup(DIRECTIONALS, &keys[last]).is_some();
    let suffix_at = if trailing_directional { last - 1 } else { last };

    let words: Vec<String> = tokens
        .iter()
        .zip(&keys)
        .enumerate()
        .map(|(i, ((core, trailing), key))| {
            let expanded = if i >= street_end {
                (i == street_end).then(|| lookup(UNIT_DESIGNATORS, key)).flatten()
            } else {
                let directional = (i == name_start && name_start < last) || (i == last && i > 0);
                directional
                    .then(|| lookup(DIRECTIONALS, key))
                    .flatten()
                    .or_else(|| {
                        (i == suffix_at && i > name_start)
                            .then(|| lookup(STREET_SUFFIXES, key))
                            .flatten()
                    })
            };
            let word = match expanded {
                Some(full) => full.to_string(),
                None if core.len() > 1
                    && core.chars().all(|c| c.is_ascii_uppercase() || c == '\'') =>
                {
                    title_case(core)
                }
                None => core.to_string(),
            };
            format!("{word}{trailing}")
        })
        .collect();
    Some(words.join(" "))
}

/// Map provider vocabulary onto the canonical property types.
///
/// Unmapped values pass through lower-cased.
pub fn normalize_property_type(text: &str) -> Option<String> {
    let lower = collapse_whitespace(&text.to_lowercase().replace(['-', '_', '/'], " "));
    if lower.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '+')
        .filter(|t| !t.is_empty())
        .collect();

    let canonical = PROPERTY_TYPE_KEYWORDS.iter().find_map(|(canonical, keywords)| {
        keywords
            .iter()
            .any(|kw| {
                if kw.contains(' ') {
                    lower.contains(kw)
                } else {
                    tokens.contains(kw)
                }
            })
            .then_some(*canonical)
    });
    Some(canonical.map(str::to_string).unwrap_or(lower))
}

/// A situs line split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitusParts {
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
}

/// Split `"123 Main St, Los Angeles, CA 90012"` into address, city, region
/// and postal code. Parts that cannot be identified are left empty.
pub fn split_situs(line: &str) -> SitusParts {
    let line = collapse_whitespace(line);
    let segments: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut parts = SitusParts::default();
    match segments.as_slice() {
        [] => {}
        [address] => parts.address = Some(address.to_string()),
        [address, tail] => {
            parts.address = Some(address.to_string());
            match split_region_postal(tail) {
                Some((region, zip)) if zip.is_some() || region.len() == 2 => {
                    parts.region = Some(region);
                    parts.postal_code = zip;
                }
                _ => parts.city = Some(tail.to_string()),
            }
        }
        [address, middle @ .., tail] => {
            parts.address = Some(address.to_string());
            parts.city = Some(middle.join(", "));
            match split_region_postal(tail) {
                Some((region, zip)) => {
                    parts.region = Some(region);
                    parts.postal_code = zip;
                }
                None => parts.region = Some(tail.to_string()),
            }
        }
    }
    parts
}

fn split_region_postal(segment: &str) -> Option<(String, Option<String>)> {
    let caps = region_postal_pattern()?.captures(segment)?;
    let region = caps.name("region")?.as_str().trim().to_string();
    let zip = caps.name("zip").map(|m| m.as_str().to_string());
    Some((region, zip))
}

/// Price divided by a positive quantity, to cents.
pub fn per(price: Option<f64>, quantity: Option<u64>) -> Option<f64> {
    match (price, quantity) {
        (Some(price), Some(quantity)) if quantity > 0 => Some(round_to(price / quantity as f64, 2)),
        _ => None,
    }
}
