// src/services/browser/chromium.rs

//! Chromium engine driven over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{BrowserEngine, BrowserSession};
use crate::error::{AppError, Result};
use crate::models::ScraperConfig;

const WAIT_POLL: Duration = Duration::from_millis(250);

/// A single shared headless Chromium instance.
pub struct ChromiumEngine {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumEngine {
    /// Launch Chromium using the scraper settings.
    pub async fn launch(config: &ScraperConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .request_timeout(config.navigation_timeout());
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| AppError::browser(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::browser(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("Chromium handler: {e}");
                }
            }
        });

        log::info!("Chromium launched");
        Ok(Self { browser, handler })
    }
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn new_session(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::browser(format!("failed to open page: {e}")))?;
        page.set_user_agent(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map_err(AppError::browser)?;
        Ok(Box::new(ChromiumSession { page }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

/// One Chromium tab.
pub struct ChromiumSession {
    page: Page,
}

impl ChromiumSession {
    async fn element(&self, selector: &str) -> Option<Element> {
        self.page.find_element(selector).await.ok()
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::extraction(url, format!("navigation failed: {e}"))),
            Err(_) => Err(AppError::extraction(
                url,
                format!("navigation timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<bool> {
        let Some(element) = self.element(selector).await else {
            return Ok(false);
        };
        element.click().await.map_err(AppError::browser)?;
        element.type_str(text).await.map_err(AppError::browser)?;
        Ok(true)
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let Some(element) = self.element(selector).await else {
            return Ok(false);
        };
        element.click().await.map_err(AppError::browser)?;
        Ok(true)
    }

    async fn press(&mut self, selector: &str, key: &str) -> Result<bool> {
        let Some(element) = self.element(selector).await else {
            return Ok(false);
        };
        element.press_key(key).await.map_err(AppError::browser)?;
        Ok(true)
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.element(selector).await.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn content(&mut self) -> Result<String> {
        self.page.content().await.map_err(AppError::browser)
    }

    async fn current_url(&mut self) -> Result<String> {
        let url = self.page.url().await.map_err(AppError::browser)?;
        Ok(url.unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await.map_err(AppError::browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_fill_and_read() {
        let engine = ChromiumEngine::launch(&ScraperConfig::default())
            .await
            .unwrap();
        let mut session = engine.new_session("test-agent").await.unwrap();
        session
            .goto(
                "data:text/html,<input id='q'><p id='v'>$1,850,000</p>",
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(session.fill("#q", "90210").await.unwrap());
        assert!(!session.click("#missing").await.unwrap());
        assert!(session.content().await.unwrap().contains("1,850,000"));
        session.close().await.unwrap();
    }
}
