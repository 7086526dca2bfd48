// src/services/fetcher.rs

//! Static-fetch strategy: one GET, offline parsing.

use std::sync::Arc;

use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{RawExtractionResult, SourceConfig};
use crate::services::extract::extract_page;
use crate::utils::http::{UserAgentPool, fetch_page_async};

/// Fetches pages with browser-like headers and a rotated user agent.
#[derive(Clone)]
pub struct StaticFetcher {
    client: Client,
    agents: Arc<UserAgentPool>,
}

impl StaticFetcher {
    pub fn new(client: Client, agents: Arc<UserAgentPool>) -> Self {
        Self { client, agents }
    }

    /// URL to fetch for a query, using the source's search template.
    pub fn search_url(source: &SourceConfig, query: &str) -> Result<String> {
        source.search_url_for(query).ok_or_else(|| {
            AppError::config(format!(
                "source '{}' has no search_url for static lookups",
                source.id
            ))
        })
    }

    /// Fetch `url` and read the source's locators from it.
    pub async fn fetch(&self, source: &SourceConfig, url: &str) -> Result<RawExtractionResult> {
        let user_agent = self.agents.next_agent();
        log::debug!("GET {} ({})", url, source.id);
        let html = fetch_page_async(&self.client, url, user_agent).await?;
        extract_page(&source.id, url, &html, &source.locators)
    }
}
