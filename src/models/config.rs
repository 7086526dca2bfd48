//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Job queue, dispatch and recurring trigger settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Extraction attempt settings
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Token bucket defaults
    #[serde(default)]
    pub rate_limit: RateLimitDefaults,

    /// Confidence scoring weights
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            return Err(AppError::validation("scheduler.concurrency must be > 0"));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(AppError::validation(
                "scheduler.poll_interval_ms must be > 0",
            ));
        }
        if self.scheduler.batch_chunk_size == 0 {
            return Err(AppError::validation(
                "scheduler.batch_chunk_size must be > 0",
            ));
        }
        if self.scheduler.quality_window_secs == 0 {
            return Err(AppError::validation(
                "scheduler.quality_window_secs must be > 0",
            ));
        }
        if self.scheduler.backoff.max_ms < self.scheduler.backoff.base_ms {
            return Err(AppError::validation(
                "scheduler.backoff.max_ms must be >= base_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.scheduler.backoff.jitter) {
            return Err(AppError::validation(
                "scheduler.backoff.jitter must be within [0, 1]",
            ));
        }
        if self.scraper.timeout_secs == 0 {
            return Err(AppError::validation("scraper.timeout_secs must be > 0"));
        }
        if self.scraper.max_sessions == 0 {
            return Err(AppError::validation("scraper.max_sessions must be > 0"));
        }
        if self.scraper.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::validation("scraper.user_agents is empty"));
        }
        if self.rate_limit.default_capacity == 0 || self.rate_limit.default_window_secs == 0 {
            return Err(AppError::validation(
                "rate_limit defaults must have non-zero capacity and window",
            ));
        }
        let n = &self.normalize;
        if n.error_penalty < n.warning_penalty || n.warning_penalty < 0.0 {
            return Err(AppError::validation(
                "normalize.error_penalty must be >= warning_penalty >= 0",
            ));
        }
        Ok(())
    }
}

/// Queue dispatch and maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum jobs in flight at once
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    /// Idle wait between polls when nothing is dispatchable
    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_ms: u64,

    /// Retry budget for jobs enqueued without one
    #[serde(default = "defaults::max_retries")]
    pub default_max_retries: u32,

    /// Priority for jobs enqueued without one (lower = sooner)
    #[serde(default = "defaults::priority")]
    pub default_priority: i32,

    /// Age after which an entity is eligible for re-ingestion
    #[serde(default = "defaults::stale_after_days")]
    pub stale_after_days: i64,

    /// Jobs created per recurring staleness sweep
    #[serde(default = "defaults::stale_batch_size")]
    pub stale_batch_size: usize,

    /// Age after which finished jobs are deleted
    #[serde(default = "defaults::cleanup_after_days")]
    pub cleanup_after_days: i64,

    /// Sub-batch width for institutional batch runs
    #[serde(default = "defaults::batch_chunk_size")]
    pub batch_chunk_size: usize,

    /// Cron expression for the staleness sweep
    #[serde(default = "defaults::stale_cron")]
    pub stale_cron: String,

    /// Cron expression for the cleanup sweep
    #[serde(default = "defaults::cleanup_cron")]
    pub cleanup_cron: String,

    /// Span of one quality report per source and data type
    #[serde(default = "defaults::quality_window")]
    pub quality_window_secs: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn quality_window(&self) -> Duration {
        Duration::from_secs(self.quality_window_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::concurrency(),
            poll_interval_ms: defaults::poll_interval(),
            default_max_retries: defaults::max_retries(),
            default_priority: defaults::priority(),
            stale_after_days: defaults::stale_after_days(),
            stale_batch_size: defaults::stale_batch_size(),
            cleanup_after_days: defaults::cleanup_after_days(),
            batch_chunk_size: defaults::batch_chunk_size(),
            stale_cron: defaults::stale_cron(),
            cleanup_cron: defaults::cleanup_cron(),
            quality_window_secs: defaults::quality_window(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay applied before a failed job becomes dispatchable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure
    #[serde(default = "defaults::backoff_base")]
    pub base_ms: u64,

    /// Upper bound on the delay
    #[serde(default = "defaults::backoff_max")]
    pub max_ms: u64,

    /// Extra random delay as a fraction of the computed delay (0..=1)
    #[serde(default = "defaults::backoff_jitter")]
    pub jitter: f64,
}

impl BackoffConfig {
    /// No delay between attempts.
    pub fn immediate() -> Self {
        Self {
            base_ms: 0,
            max_ms: 0,
            jitter: 0.0,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: defaults::backoff_base(),
            max_ms: defaults::backoff_max(),
            jitter: defaults::backoff_jitter(),
        }
    }
}

/// Extraction attempt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Hard budget for one extraction attempt
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Budget for a single browser wait condition
    #[serde(default = "defaults::navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Settle period after submitting a generic search form
    #[serde(default = "defaults::settle")]
    pub settle_ms: u64,

    /// Maximum concurrently open browser sessions
    #[serde(default = "defaults::max_sessions")]
    pub max_sessions: usize,

    /// User agents rotated across requests
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Explicit Chromium binary; auto-detected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<String>,

    #[serde(default = "defaults::headless")]
    pub headless: bool,
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout(),
            navigation_timeout_ms: defaults::navigation_timeout(),
            settle_ms: defaults::settle(),
            max_sessions: defaults::max_sessions(),
            user_agents: defaults::user_agents(),
            chrome_executable: None,
            headless: defaults::headless(),
        }
    }
}

/// Token bucket defaults for sources that do not set their own limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    /// How often queued callers re-check the bucket
    #[serde(default = "defaults::rate_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "defaults::rate_capacity")]
    pub default_capacity: u32,

    #[serde(default = "defaults::rate_window")]
    pub default_window_secs: u64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::rate_poll_interval(),
            default_capacity: defaults::rate_capacity(),
            default_window_secs: defaults::rate_window(),
        }
    }
}

/// Confidence scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Confidence removed per hard error
    #[serde(default = "defaults::error_penalty")]
    pub error_penalty: f64,

    /// Confidence removed per warning
    #[serde(default = "defaults::warning_penalty")]
    pub warning_penalty: f64,

    /// Confidence added per high-value optional field present
    #[serde(default = "defaults::optional_bonus")]
    pub optional_bonus: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            error_penalty: defaults::error_penalty(),
            warning_penalty: defaults::warning_penalty(),
            optional_bonus: defaults::optional_bonus(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Scheduler defaults
    pub fn concurrency() -> usize {
        3
    }
    pub fn poll_interval() -> u64 {
        1000
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn priority() -> i32 {
        5
    }
    pub fn stale_after_days() -> i64 {
        30
    }
    pub fn stale_batch_size() -> usize {
        50
    }
    pub fn cleanup_after_days() -> i64 {
        14
    }
    pub fn batch_chunk_size() -> usize {
        5
    }
    pub fn stale_cron() -> String {
        "0 2 * * *".into()
    }
    pub fn cleanup_cron() -> String {
        "0 3 * * SUN".into()
    }
    pub fn quality_window() -> u64 {
        3600
    }

    // Backoff defaults
    pub fn backoff_base() -> u64 {
        2_000
    }
    pub fn backoff_max() -> u64 {
        300_000
    }
    pub fn backoff_jitter() -> f64 {
        0.25
    }

    // Scraper defaults
    pub fn timeout() -> u64 {
        60
    }
    pub fn navigation_timeout() -> u64 {
        30_000
    }
    pub fn settle() -> u64 {
        2_000
    }
    pub fn max_sessions() -> usize {
        2
    }
    pub fn headless() -> bool {
        true
    }
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".into(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0".into(),
        ]
    }

    // Rate limit defaults
    pub fn rate_poll_interval() -> u64 {
        100
    }
    pub fn rate_capacity() -> u32 {
        10
    }
    pub fn rate_window() -> u64 {
        60
    }

    // Normalization defaults
    pub fn error_penalty() -> f64 {
        0.2
    }
    pub fn warning_penalty() -> f64 {
        0.05
    }
    pub fn optional_bonus() -> f64 {
        0.02
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
