//! Shared fixtures: a scripted fake browser and a wired scheduler.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use realty_ingest::error::{AppError, Result};
use realty_ingest::models::{BackoffConfig, Config};
use realty_ingest::scheduler::{self, Scheduler};
use realty_ingest::services::{BrowserEngine, BrowserSession, SourceRegistry};
use realty_ingest::storage::MemoryStore;

pub const LA_DETAIL_PAGE: &str = r#"<html><body>
    <div class="parcel-detail">
        <span id="ain">4333-001-002</span>
        <div class="property-address">123 MAIN ST, BEVERLY HILLS, CA 90210</div>
        <span id="use-type">Single Family Residence</span>
        <span id="total-value">$1,850,000</span>
        <span id="land-value">$1,100,000</span>
        <span id="improvement-value">$750,000</span>
        <span id="year-built">1962</span>
        <span id="building-sqft">2,450</span>
        <span id="roll-year">2024</span>
    </div>
</body></html>"#;

/// Parcel page with no situs line at all.
pub const LA_PAGE_WITHOUT_ADDRESS: &str = r#"<html><body>
    <span id="ain">4333-001-099</span>
    <span id="total-value">$640,000</span>
</body></html>"#;

#[derive(Debug, Default)]
pub struct BrowserStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub typed: Mutex<Vec<String>>,
}

impl BrowserStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn typed(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }
}

/// Browser whose every page renders the same markup.
pub struct FakeBrowser {
    html: &'static str,
    delay: Duration,
    pub stats: Arc<BrowserStats>,
}

impl FakeBrowser {
    pub fn new(html: &'static str) -> Self {
        Self {
            html,
            delay: Duration::ZERO,
            stats: Arc::new(BrowserStats::default()),
        }
    }

    /// Delay applied when the page content is read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct FakeSession {
    html: &'static str,
    delay: Duration,
    stats: Arc<BrowserStats>,
}

#[async_trait]
impl BrowserEngine for FakeBrowser {
    async fn new_session(&self, _user_agent: &str) -> Result<Box<dyn BrowserSession>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            html: self.html,
            delay: self.delay,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::browser("empty url"));
        }
        Ok(())
    }

    async fn fill(&mut self, _selector: &str, text: &str) -> Result<bool> {
        self.stats.typed.lock().unwrap().push(text.to_string());
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
        Ok("https://portal.assessor.lacounty.gov/parcel/4333001002".to_string())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fast settings: no backoff, short waits.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.backoff = BackoffConfig::immediate();
    config.scheduler.poll_interval_ms = 10;
    config.scraper.timeout_secs = 5;
    config.scraper.navigation_timeout_ms = 500;
    config.scraper.settle_ms = 5;
    config
}

pub fn scheduler_with(
    config: &Config,
    registry: SourceRegistry,
    engine: Arc<dyn BrowserEngine>,
) -> (Scheduler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let scheduler =
        scheduler::build(config, Arc::new(registry), Arc::clone(&store), engine).unwrap();
    (scheduler, store)
}

/// Scheduler over the built-in sources and a fake browser.
pub fn scheduler(browser: FakeBrowser) -> (Scheduler, Arc<MemoryStore>) {
    scheduler_with(&test_config(), SourceRegistry::with_defaults(), Arc::new(browser))
}
