// src/services/strategy.rs

//! Interactive navigation strategies, resolved per source.
//!
//! A few high-volume assessor sites have hand-written step sequences; every
//! other interactive source falls back to [`GenericSearchStrategy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ScraperConfig, SourceConfig};
use crate::services::browser::BrowserSession;

/// Time budgets shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct NavTimeouts {
    pub navigation: Duration,
    pub settle: Duration,
}

impl From<&ScraperConfig> for NavTimeouts {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            navigation: config.navigation_timeout(),
            settle: config.settle(),
        }
    }
}

/// Drives a session from the source's landing page to the page holding the
/// configured locators.
#[async_trait]
pub trait NavigationStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn navigate(
        &self,
        session: &mut dyn BrowserSession,
        source: &SourceConfig,
        query: &str,
        timeouts: NavTimeouts,
    ) -> Result<()>;
}

/// One scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStep {
    /// Load the source's base URL
    Open,
    /// Type the query into an element
    Fill(&'static str),
    Click(&'static str),
    /// Press Enter on an element
    Submit(&'static str),
    /// Wait for an element; absence is a locator miss
    WaitFor(&'static str),
    /// Click if present, otherwise continue
    ClickIfPresent(&'static str),
    /// Fixed pause for client-side rendering
    Settle,
}

/// A fixed step sequence for one source.
#[derive(Debug, Clone)]
pub struct ScriptedSearch {
    name: &'static str,
    steps: Vec<NavStep>,
}

impl ScriptedSearch {
    pub fn new(name: &'static str, steps: Vec<NavStep>) -> Self {
        Self { name, steps }
    }

    pub fn steps(&self) -> &[NavStep] {
        &self.steps
    }

    fn miss(source: &SourceConfig, what: &str, selector: &str) -> AppError {
        AppError::extraction(&source.id, format!("{what} not found: {selector}"))
    }
}

#[async_trait]
impl NavigationStrategy for ScriptedSearch {
    fn name(&self) -> &str {
        self.name
    }

    async fn navigate(
        &self,
        session: &mut dyn BrowserSession,
        source: &SourceConfig,
        query: &str,
        timeouts: NavTimeouts,
    ) -> Result<()> {
        for step in &self.steps {
            log::debug!("{} [{}]: {:?}", source.id, self.name, step);
            match *step {
                NavStep::Open => session.goto(&source.base_url, timeouts.navigation).await?,
                NavStep::Fill(sel) => {
                    if !session.fill(sel, query).await? {
                        return Err(Self::miss(source, "search field", sel));
                    }
                }
                NavStep::Click(sel) => {
                    if !session.click(sel).await? {
                        return Err(Self::miss(source, "element", sel));
                    }
                }
                NavStep::Submit(sel) => {
                    if !session.press(sel, "Enter").await? {
                        return Err(Self::miss(source, "search field", sel));
                    }
                }
                NavStep::WaitFor(sel) => {
                    if !session.wait_for(sel, timeouts.navigation).await? {
                        return Err(Self::miss(source, "expected element", sel));
                    }
                }
                NavStep::ClickIfPresent(sel) => {
                    session.click(sel).await?;
                }
                NavStep::Settle => tokio::time::sleep(timeouts.settle).await,
            }
        }
        Ok(())
    }
}

/// Common search inputs, tried in order.
pub const SEARCH_INPUTS: &[&str] = &[
    "input[type='search']",
    "input[name*='search' i]",
    "input[id*='search' i]",
    "input[name*='address' i]",
    "input[placeholder*='address' i]",
    "input[name*='parcel' i]",
    "input[type='text']",
];

/// Common submit controls, tried in order.
pub const SUBMIT_BUTTONS: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    "button[id*='search' i]",
    "button[class*='search' i]",
    "a[id*='search' i]",
];

/// Fallback for interactive sources without a scripted sequence.
#[derive(Debug, Clone, Default)]
pub struct GenericSearchStrategy;

#[async_trait]
impl NavigationStrategy for GenericSearchStrategy {
    fn name(&self) -> &str {
        "generic"
    }

    async fn navigate(
        &self,
        session: &mut dyn BrowserSession,
        source: &SourceConfig,
        query: &str,
        timeouts: NavTimeouts,
    ) -> Result<()> {
        session.goto(&source.base_url, timeouts.navigation).await?;

        let mut input = None;
        for sel in SEARCH_INPUTS {
            if session.fill(sel, query).await? {
                input = Some(*sel);
                break;
            }
        }
        let Some(input) = input else {
            return Err(AppError::extraction(&source.id, "no search input found"));
        };

        let mut submitted = false;
        for sel in SUBMIT_BUTTONS {
            if session.click(sel).await? {
                submitted = true;
                break;
            }
        }
        if !submitted {
            log::debug!("{}: no submit control, pressing Enter in {}", source.id, input);
            session.press(input, "Enter").await?;
        }

        tokio::time::sleep(timeouts.settle).await;
        Ok(())
    }
}

/// Per-source scripted sequences.
mod scripts {
    use super::NavStep::{self, *};

    pub const LA_COUNTY: &[NavStep] = &[
        Open,
        WaitFor("#searchbox"),
        Fill("#searchbox"),
        Click("#searchbutton"),
        WaitFor(".search-results, #ain"),
        ClickIfPresent(".search-results a.result-link"),
        WaitFor("#total-value"),
        Settle,
    ];

    pub const COOK_COUNTY: &[NavStep] = &[
        Open,
        ClickIfPresent("a[href*='address-search']"),
        WaitFor("input#edit-address"),
        Fill("input#edit-address"),
        Submit("input#edit-address"),
        WaitFor(".search-results-table, .pin-number"),
        ClickIfPresent(".search-results-table tbody tr:first-child a"),
        WaitFor(".pin-number"),
        Settle,
    ];

    pub const HARRIS_COUNTY: &[NavStep] = &[
        Open,
        WaitFor("#searchInput"),
        Fill("#searchInput"),
        Click("#searchButton"),
        WaitFor("table.search-results, td.account-number"),
        ClickIfPresent("table.search-results tr.result-row a"),
        WaitFor("td.appraised-value"),
        Settle,
    ];
}

/// Maps source ids to strategies with a generic default.
#[derive(Clone)]
pub struct StrategyRegistry {
    by_source: HashMap<String, Arc<dyn NavigationStrategy>>,
    fallback: Arc<dyn NavigationStrategy>,
}

impl StrategyRegistry {
    /// Registry with no scripted sources.
    pub fn new() -> Self {
        Self {
            by_source: HashMap::new(),
            fallback: Arc::new(GenericSearchStrategy),
        }
    }

    /// Registry with the built-in scripted sources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (source_id, name, steps) in [
            ("la-county-assessor", "la-county", scripts::LA_COUNTY),
            ("cook-county-assessor", "cook-county", scripts::COOK_COUNTY),
            ("harris-county-appraisal", "harris-county", scripts::HARRIS_COUNTY),
        ] {
            registry.register(source_id, Arc::new(ScriptedSearch::new(name, steps.to_vec())));
        }
        registry
    }

    pub fn register(&mut self, source_id: impl Into<String>, strategy: Arc<dyn NavigationStrategy>) {
        self.by_source.insert(source_id.into(), strategy);
    }

    /// The strategy for a source, resolved once per job.
    pub fn resolve(&self, source_id: &str) -> Arc<dyn NavigationStrategy> {
        self.by_source
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Session that knows a fixed set of selectors and records actions.
    #[derive(Default)]
    struct ScriptSession {
        present: HashSet<&'static str>,
        actions: Vec<String>,
    }

    #[async_trait]
    impl BrowserSession for ScriptSession {
        async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
            self.actions.push(format!("goto {url}"));
            Ok(())
        }
        async fn fill(&mut self, selector: &str, text: &str) -> Result<bool> {
            let found = self.present.contains(selector);
            if found {
                self.actions.push(format!("fill {selector} {text}"));
            }
            Ok(found)
        }
        async fn click(&mut self, selector: &str) -> Result<bool> {
            let found = self.present.contains(selector);
            if found {
                self.actions.push(format!("click {selector}"));
            }
            Ok(found)
        }
        async fn press(&mut self, selector: &str, key: &str) -> Result<bool> {
            self.actions.push(format!("press {selector} {key}"));
            Ok(self.present.contains(selector))
        }
        async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
            Ok(self.present.contains(selector))
        }
        async fn content(&mut self) -> Result<String> {
            Ok(String::new())
        }
        async fn current_url(&mut self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn source(id: &str) -> SourceConfig {
        toml::from_str(&format!(
            "id = \"{id}\"\nname = \"Test\"\nbase_url = \"https://assessor.example.gov/\"\n"
        ))
        .unwrap()
    }

    fn timeouts() -> NavTimeouts {
        NavTimeouts {
            navigation: Duration::from_secs(1),
            settle: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_registry_falls_back_to_generic() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.resolve("la-county-assessor").name(), "la-county");
        assert_eq!(registry.resolve("king-county-assessor").name(), "generic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_uses_first_matching_input() {
        let mut session = ScriptSession {
            present: HashSet::from(["input[name*='address' i]", "input[type='submit']"]),
            ..Default::default()
        };
        GenericSearchStrategy
            .navigate(&mut session, &source("x"), "123 Main St", timeouts())
            .await
            .unwrap();

        assert_eq!(
            session.actions,
            vec![
                "goto https://assessor.example.gov/",
                "fill input[name*='address' i] 123 Main St",
                "click input[type='submit']",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_presses_enter_without_submit() {
        let mut session = ScriptSession {
            present: HashSet::from(["input[type='search']"]),
            ..Default::default()
        };
        GenericSearchStrategy
            .navigate(&mut session, &source("x"), "90210", timeouts())
            .await
            .unwrap();
        assert_eq!(
            session.actions.last().unwrap(),
            "press input[type='search'] Enter"
        );
    }

    #[tokio::test]
    async fn test_generic_without_input_is_a_miss() {
        let mut session = ScriptSession::default();
        let err = GenericSearchStrategy
            .navigate(&mut session, &source("x"), "90210", timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_stops_on_missing_element() {
        let mut session = ScriptSession {
            present: HashSet::from(["#searchbox", "#searchbutton"]),
            ..Default::default()
        };
        let strategy = StrategyRegistry::with_defaults().resolve("la-county-assessor");
        let err = strategy
            .navigate(&mut session, &source("la-county-assessor"), "90210", timeouts())
            .await
            .unwrap_err();

        assert!(err.to_string().contains(".search-results, #ain"));
        assert_eq!(
            session.actions,
            vec![
                "goto https://assessor.example.gov/",
                "fill #searchbox 90210",
                "click #searchbutton",
            ]
        );
    }
}
