// src/services/executor.rs

//! One extraction attempt against one source.
//!
//! The executor never returns an error: every failure (timeout, navigation,
//! locator miss, fetch error) is caught here and reported in a
//! [`ScrapeOutcome`] so that the scheduler alone decides on retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{RawExtractionResult, ScraperConfig, SourceConfig, TargetRef};
use crate::services::browser::{BrowserPool, BrowserSession, SessionSlot};
use crate::services::extract::extract_page;
use crate::services::fetcher::StaticFetcher;
use crate::services::rate_limiter::RateLimiter;
use crate::services::registry::SourceRegistry;
use crate::services::strategy::{NavTimeouts, StrategyRegistry};
use crate::utils::http::{UserAgentPool, create_async_client};

/// What to scrape.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub job_id: Uuid,
    pub source: SourceConfig,
    pub target: TargetRef,
    /// Search text for postal code and entity targets
    pub query: Option<String>,
}

/// Failure classes the scheduler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No usable source or search input; never retried
    Configuration,
    /// Timeout, navigation error or locator miss
    Transient,
    /// Browser launch, storage or I/O failure
    Infrastructure,
}

impl From<&AppError> for FailureKind {
    fn from(error: &AppError) -> Self {
        match error {
            AppError::Browser(_) | AppError::Storage(_) | AppError::Io(_) => {
                FailureKind::Infrastructure
            }
            e if !e.is_retryable() => FailureKind::Configuration,
            _ => FailureKind::Transient,
        }
    }
}

/// Structured result of one attempt.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub data: Option<RawExtractionResult>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ScrapeOutcome {
    pub fn succeeded(data: RawExtractionResult) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            failure: None,
        }
    }

    pub fn failed(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            failure: Some(FailureKind::from(error)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.failure,
            Some(FailureKind::Transient | FailureKind::Infrastructure)
        )
    }
}

/// Runs interactive or static extraction for a resolved source.
pub struct ScraperExecutor {
    registry: Arc<SourceRegistry>,
    limiter: Arc<RateLimiter>,
    fetcher: StaticFetcher,
    browsers: BrowserPool,
    strategies: StrategyRegistry,
    agents: Arc<UserAgentPool>,
    attempt_timeout: Duration,
    timeouts: NavTimeouts,
}

impl ScraperExecutor {
    pub fn new(
        config: &ScraperConfig,
        registry: Arc<SourceRegistry>,
        limiter: Arc<RateLimiter>,
        browsers: BrowserPool,
    ) -> Result<Self> {
        let agents = Arc::new(UserAgentPool::new(config.user_agents.clone())?);
        let client = create_async_client(config)?;
        Ok(Self {
            registry,
            limiter,
            fetcher: StaticFetcher::new(client, Arc::clone(&agents)),
            browsers,
            strategies: StrategyRegistry::with_defaults(),
            agents,
            attempt_timeout: config.timeout(),
            timeouts: NavTimeouts::from(config),
        })
    }

    /// Replace the navigation strategy registry.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Run one bounded attempt. Source counters are updated on every attempt.
    pub async fn execute(&self, request: &ScrapeRequest) -> ScrapeOutcome {
        let source = &request.source;
        if source.auth_required {
            return ScrapeOutcome::failed(&AppError::config(format!(
                "source '{}' requires authentication, which is not supported",
                source.id
            )));
        }

        // Waits for a rate limit token or a browser slot are not part of the attempt
        self.limiter.acquire(source).await;
        let result = match self.reserve_slot(source).await {
            Ok(slot) => {
                match tokio::time::timeout(self.attempt_timeout, self.attempt(request, slot)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(self.attempt_timeout.as_secs())),
                }
            }
            Err(e) => Err(e),
        };
        self.registry.record_attempt(&source.id, result.is_ok());

        match result {
            Ok(raw) => {
                log::info!(
                    "Job {}: extracted {} fields from {}",
                    request.job_id,
                    raw.fields.len(),
                    source.id
                );
                ScrapeOutcome::succeeded(raw)
            }
            Err(e) => {
                log::warn!("Job {}: {} attempt failed: {}", request.job_id, source.id, e);
                ScrapeOutcome::failed(&e)
            }
        }
    }

    async fn reserve_slot(&self, source: &SourceConfig) -> Result<Option<SessionSlot>> {
        if !source.needs_interactive_rendering {
            return Ok(None);
        }
        self.browsers.reserve().await.map(Some)
    }

    async fn attempt(
        &self,
        request: &ScrapeRequest,
        slot: Option<SessionSlot>,
    ) -> Result<RawExtractionResult> {
        let raw = match slot {
            Some(slot) => self.interactive(slot, request).await?,
            None => self.fetch_static(request).await?,
        };
        if raw.fields.is_empty() && !request.source.locators.is_empty() {
            return Err(AppError::extraction(
                &raw.url,
                "none of the configured fields were found",
            ));
        }
        Ok(raw)
    }

    async fn fetch_static(&self, request: &ScrapeRequest) -> Result<RawExtractionResult> {
        let url = match &request.target {
            TargetRef::Url(url) => url.clone(),
            _ => StaticFetcher::search_url(&request.source, query(request)?)?,
        };
        self.fetcher.fetch(&request.source, &url).await
    }

    async fn interactive(
        &self,
        slot: SessionSlot,
        request: &ScrapeRequest,
    ) -> Result<RawExtractionResult> {
        let mut lease = slot.open(self.agents.next_agent()).await?;
        let result = self.drive(lease.session()?, request).await;
        if let Err(e) = lease.release().await {
            log::warn!("Job {}: failed to close browser session: {}", request.job_id, e);
        }
        result
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        request: &ScrapeRequest,
    ) -> Result<RawExtractionResult> {
        let source = &request.source;
        match &request.target {
            TargetRef::Url(url) => {
                session.goto(url, self.timeouts.navigation).await?;
                tokio::time::sleep(self.timeouts.settle).await;
            }
            _ => {
                let strategy = self.strategies.resolve(&source.id);
                log::debug!("Job {}: {} via {}", request.job_id, source.id, strategy.name());
                strategy
                    .navigate(session, source, query(request)?, self.timeouts)
                    .await?;
            }
        }
        let html = session.content().await?;
        let url = session.current_url().await?;
        extract_page(&source.id, &url, &html, &source.locators)
    }
}

fn query(request: &ScrapeRequest) -> Result<&str> {
    request
        .query
        .as_deref()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::config(format!("no search query for target {}", request.target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::models::RateLimitDefaults;
    use crate::services::browser::{BrowserEngine, UnavailableBrowser};

    struct PageEngine {
        html: &'static str,
        delay: Duration,
        closed: Arc<AtomicUsize>,
    }

    struct PageSession {
        html: &'static str,
        delay: Duration,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserEngine for PageEngine {
        async fn new_session(&self, _user_agent: &str) -> Result<Box<dyn BrowserSession>> {
            Ok(Box::new(PageSession {
                html: self.html,
                delay: self.delay,
                closed: Arc::clone(&self.closed),
            }))
        }

        fn name(&self) -> &'static str {
            "page"
        }
    }

    #[async_trait]
    impl BrowserSession for PageSession {
        async fn goto(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn fill(&mut self, _selector: &str, _text: &str) -> Result<bool> {
            Ok(true)
        }
        async fn click(&mut self, _selector: &str) -> Result<bool> {
            Ok(true)
        }
        async fn press(&mut self, _selector: &str, _key: &str) -> Result<bool> {
            Ok(true)
        }
        async fn wait_for(&mut self, _selector: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
        async fn content(&mut self) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.html.to_string())
        }
        async fn current_url(&mut self) -> Result<String> {
            Ok("https://portal.assessor.lacounty.gov/parcel/4333001002".into())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const LA_PAGE: &str = r#"<html>
        <span id="ain">4333-001-002</span>
        <div class="property-address">123 Main St, Beverly Hills, CA 90210</div>
        <span id="total-value">$1,850,000</span>
    </html>"#;

    fn executor(engine: Arc<dyn BrowserEngine>) -> ScraperExecutor {
        let config = ScraperConfig {
            timeout_secs: 5,
            settle_ms: 10,
            ..ScraperConfig::default()
        };
        ScraperExecutor::new(
            &config,
            Arc::new(SourceRegistry::with_defaults()),
            Arc::new(RateLimiter::new(RateLimitDefaults::default())),
            BrowserPool::new(engine, 1),
        )
        .unwrap()
    }

    fn la_request(executor: &ScraperExecutor) -> ScrapeRequest {
        ScrapeRequest {
            job_id: Uuid::new_v4(),
            source: executor.registry().get("la-county-assessor").unwrap(),
            target: TargetRef::PostalCode("90210".into()),
            query: Some("90210".into()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_extraction() {
        let closed = Arc::new(AtomicUsize::new(0));
        let executor = executor(Arc::new(PageEngine {
            html: LA_PAGE,
            delay: Duration::ZERO,
            closed: Arc::clone(&closed),
        }));

        let outcome = executor.execute(&la_request(&executor)).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let raw = outcome.data.unwrap();
        assert_eq!(raw.fields["assessed_value"].as_f64(), Some(1_850_000.0));
        assert_eq!(raw.text("parcel_id").as_deref(), Some("4333-001-002"));
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let la = executor.registry().get("la-county-assessor").unwrap();
        assert_eq!(la.stats.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable_and_releases_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let executor = executor(Arc::new(PageEngine {
            html: LA_PAGE,
            delay: Duration::from_secs(60),
            closed: Arc::clone(&closed),
        }));

        let outcome = executor.execute(&la_request(&executor)).await;
        assert!(!outcome.success);
        assert!(outcome.is_retryable());
        assert!(outcome.error.unwrap().contains("Timed out"));

        // Abandoned lease closes on a background task
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        let la = executor.registry().get("la-county-assessor").unwrap();
        assert_eq!(la.stats.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_for_a_browser_slot_is_not_timed() {
        let closed = Arc::new(AtomicUsize::new(0));
        // Each attempt takes 3s of a 5s budget; the single slot is shared
        let executor = executor(Arc::new(PageEngine {
            html: LA_PAGE,
            delay: Duration::from_secs(3),
            closed: Arc::clone(&closed),
        }));
        let first = la_request(&executor);
        let second = la_request(&executor);

        let (a, b) = tokio::join!(executor.execute(&first), executor.execute(&second));
        assert!(a.success, "{:?}", a.error);
        assert!(b.success, "{:?}", b.error);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_is_a_locator_miss() {
        let executor = executor(Arc::new(PageEngine {
            html: "<html><p>No results</p></html>",
            delay: Duration::ZERO,
            closed: Arc::new(AtomicUsize::new(0)),
        }));

        let outcome = executor.execute(&la_request(&executor)).await;
        assert_eq!(outcome.failure, Some(FailureKind::Transient));
    }

    #[tokio::test]
    async fn test_browser_unavailable_is_infrastructure() {
        let executor = executor(Arc::new(UnavailableBrowser::new("not installed")));
        let outcome = executor.execute(&la_request(&executor)).await;
        assert_eq!(outcome.failure, Some(FailureKind::Infrastructure));
        assert!(outcome.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_required_is_not_attempted() {
        let executor = executor(Arc::new(UnavailableBrowser::new("unused")));
        let request = ScrapeRequest {
            source: executor.registry().get("subscription-comps").unwrap(),
            ..la_request(&executor)
        };

        let outcome = executor.execute(&request).await;
        assert_eq!(outcome.failure, Some(FailureKind::Configuration));
        assert!(!outcome.is_retryable());
        let source = executor.registry().get("subscription-comps").unwrap();
        assert_eq!(source.stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_missing_query_is_configuration() {
        let executor = executor(Arc::new(UnavailableBrowser::new("unused")));
        let request = ScrapeRequest {
            source: executor.registry().get("king-county-assessor").unwrap(),
            query: None,
            ..la_request(&executor)
        };
        let outcome = executor.execute(&request).await;
        assert_eq!(outcome.failure, Some(FailureKind::Configuration));
    }
}
