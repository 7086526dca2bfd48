// src/services/browser/mod.rs

//! Scripted browser abstraction.
//!
//! [`BrowserEngine`] is the single long-lived browser; each job opens its own
//! [`BrowserSession`] (an isolated tab) through the [`BrowserPool`].

#[cfg(feature = "browser")]
pub mod chromium;
pub mod pool;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};

pub use pool::{BrowserPool, SessionLease, SessionSlot};

/// A browser that can open isolated sessions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a fresh session presenting the given user agent.
    async fn new_session(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>>;

    /// Short engine name for logs.
    fn name(&self) -> &'static str;
}

/// One isolated browsing session.
///
/// Element helpers return `Ok(false)` when the element is absent so that
/// callers can try fallbacks; `Err` is reserved for session failures.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Type text into the first element matching `selector`.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<bool>;

    async fn click(&mut self, selector: &str) -> Result<bool>;

    /// Press a named key (e.g. "Enter") on the first matching element.
    async fn press(&mut self, selector: &str, key: &str) -> Result<bool>;

    /// Wait until `selector` matches, up to `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Rendered document markup.
    async fn content(&mut self) -> Result<String>;

    async fn current_url(&mut self) -> Result<String>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Engine used when no browser could be launched.
///
/// Every session request fails with a retryable browser error, so static
/// sources keep working while interactive jobs back off.
#[derive(Debug, Clone)]
pub struct UnavailableBrowser {
    reason: String,
}

impl UnavailableBrowser {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BrowserEngine for UnavailableBrowser {
    async fn new_session(&self, _user_agent: &str) -> Result<Box<dyn BrowserSession>> {
        Err(AppError::browser(format!(
            "browser not available: {}",
            self.reason
        )))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
