//! Utility functions and helpers.

pub mod http;
pub mod log;

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Extract the domain from a URL string.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_lowercase()))
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse the first numeric run in display text, dropping thousands separators.
///
/// `"$1,850,000 (2024)"` -> 1850000. Returns `None` when there are no digits.
pub fn first_number(text: &str) -> Option<f64> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"-?(?:\d[\d,]*(?:\.\d+)?|\.\d+)").ok())
        .as_ref()?;
    pattern.find(text)?.as_str().replace(',', "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_domain() {
        assert_eq!(
            get_domain("https://Portal.AssessorMap.lacounty.gov/path"),
            Some("portal.assessormap.lacounty.gov".to_string())
        );
        assert_eq!(get_domain("not a url"), None);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  123   Main\n\tSt "), "123 Main St");
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("$1,850,000 (2024)"), Some(1_850_000.0));
        assert_eq!(first_number("Built 1962, remodeled 2004"), Some(1962.0));
        assert_eq!(first_number("-3 units"), Some(-3.0));
        assert_eq!(first_number("Rate .25"), Some(0.25));
        assert_eq!(first_number("--"), None);
    }
}
