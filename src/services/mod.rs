//! Service layer for the ingestion pipeline.
//!
//! This module contains the extraction machinery:
//! - Per-source throttling (`RateLimiter`)
//! - Source configuration and health (`SourceRegistry`)
//! - Browser sessions and navigation strategies (`BrowserPool`, `StrategyRegistry`)
//! - Static fetching and locator extraction (`StaticFetcher`)
//! - One bounded extraction attempt (`ScraperExecutor`)

pub mod browser;
pub mod executor;
pub mod extract;
pub mod fetcher;
pub mod rate_limiter;
pub mod registry;
pub mod strategy;

#[cfg(feature = "browser")]
pub use browser::chromium::ChromiumEngine;
pub use browser::{BrowserEngine, BrowserPool, BrowserSession, SessionLease, UnavailableBrowser};
pub use executor::{FailureKind, ScrapeOutcome, ScrapeRequest, ScraperExecutor};
pub use fetcher::StaticFetcher;
pub use rate_limiter::{RateLimiter, TokenBucket};
pub use registry::{SourceFile, SourceRegistry};
pub use strategy::{
    GenericSearchStrategy, NavStep, NavTimeouts, NavigationStrategy, ScriptedSearch,
    StrategyRegistry,
};
