//! Job queue, dispatch loop and recurring triggers.
//!
//! - `queue`: durable jobs and their lifecycle (`JobQueue`)
//! - `worker`: bounded-concurrency dispatch (`Scheduler`)
//! - `batch`: chunked institutional runs (`BatchRunner`)
//! - `triggers`: cron-driven staleness sweep and cleanup
//! - `backoff`: retry delays

pub mod backoff;
pub mod batch;
pub mod queue;
pub mod triggers;
pub mod worker;

use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{Normalizer, QualityReporter};
use crate::services::{BrowserEngine, BrowserPool, RateLimiter, ScraperExecutor, SourceRegistry};
use crate::storage::{RecordStore, Store};

pub use batch::{BatchItem, BatchRunner};
pub use queue::{EnqueueRequest, JobQueue};
pub use triggers::{RecurringTriggers, Trigger, parse_cron};
pub use worker::{DrainSummary, JobPayload, Scheduler};

/// Wire a scheduler from configuration, a store and a browser engine.
pub fn build<S: Store + 'static>(
    config: &Config,
    registry: Arc<SourceRegistry>,
    store: Arc<S>,
    engine: Arc<dyn BrowserEngine>,
) -> Result<Scheduler> {
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let browsers = BrowserPool::new(engine, config.scraper.max_sessions);
    let executor = ScraperExecutor::new(&config.scraper, Arc::clone(&registry), limiter, browsers)?;

    let job_store: Arc<dyn Store> = store.clone();
    let record_store: Arc<dyn RecordStore> = store;
    let queue = JobQueue::new(job_store, registry, config.scheduler.clone());

    Ok(Scheduler::new(
        queue,
        Arc::new(executor),
        Normalizer::new(config.normalize.clone()),
        QualityReporter::new(record_store, config.scheduler.quality_window()),
    ))
}
