// src/utils/http.rs

//! HTTP client utilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::ScraperConfig;

/// Create a configured asynchronous HTTP client.
///
/// The user agent is set per request by [`UserAgentPool`], not here.
pub fn create_async_client(config: &ScraperConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .default_headers(browser_headers())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Headers a desktop browser sends on a top-level navigation.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

/// Round-robin user agent rotation with a random starting point.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
    next: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Result<Self> {
        let agents: Vec<String> = agents
            .into_iter()
            .filter(|ua| !ua.trim().is_empty())
            .collect();
        if agents.is_empty() {
            return Err(AppError::config("at least one user agent is required"));
        }
        let start = rand::thread_rng().gen_range(0..agents.len());
        Ok(Self {
            agents,
            next: AtomicUsize::new(start),
        })
    }

    /// The user agent for the next request.
    pub fn next_agent(&self) -> &str {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }
}

/// Fetch a page body, failing on non-success status codes.
///
/// Markup is returned unparsed; `scraper::Html` must not be held across an
/// await in a task that may move between threads.
pub async fn fetch_page_async(
    client: &reqwest::Client,
    url: &str,
    user_agent: &str,
) -> Result<String> {
    let text = client
        .get(url)
        .header(header::USER_AGENT, user_agent)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(text)
}
