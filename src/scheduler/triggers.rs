//! Cron-driven maintenance: staleness sweep and job cleanup.

use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::Result;
use crate::models::SchedulerConfig;
use crate::scheduler::queue::JobQueue;

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Ok(Schedule::from_str(&normalized)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    StaleSweep,
    Cleanup,
}

/// Periodically invokes `bulk_enqueue_stale` and `cleanup`.
pub struct RecurringTriggers {
    queue: JobQueue,
    stale: Schedule,
    cleanup: Schedule,
    stale_batch_size: usize,
    cleanup_after_days: i64,
}

impl RecurringTriggers {
    pub fn new(queue: JobQueue, config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            queue,
            stale: parse_cron(&config.stale_cron)?,
            cleanup: parse_cron(&config.cleanup_cron)?,
            stale_batch_size: config.stale_batch_size,
            cleanup_after_days: config.cleanup_after_days,
        })
    }

    /// The earliest trigger due strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<(Trigger, DateTime<Utc>)> {
        let stale = self.stale.after(&after).next().map(|at| (Trigger::StaleSweep, at));
        let cleanup = self.cleanup.after(&after).next().map(|at| (Trigger::Cleanup, at));
        match (stale, cleanup) {
            (Some(s), Some(c)) => Some(if c.1 < s.1 { c } else { s }),
            (s, c) => s.or(c),
        }
    }

    pub async fn fire(&self, trigger: Trigger) -> Result<usize> {
        match trigger {
            Trigger::StaleSweep => Ok(self
                .queue
                .bulk_enqueue_stale(self.stale_batch_size)
                .await?
                .len()),
            Trigger::Cleanup => self.queue.cleanup(self.cleanup_after_days).await,
        }
    }

    /// Sleep until each trigger is due and fire it, until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let Some((trigger, at)) = self.next_fire(Utc::now()) else {
                log::warn!("No upcoming trigger, recurring triggers stopped");
                return;
            };
            log::debug!("Next trigger {:?} at {}", trigger, at);
            let wait = (at - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(wait) => {}
            }
            match self.fire(trigger).await {
                Ok(n) => log::info!("Trigger {:?} affected {} jobs", trigger, n),
                Err(e) => log::error!("Trigger {:?} failed: {}", trigger, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;

    use crate::models::{EntityType, TrackedEntity};
    use crate::services::SourceRegistry;
    use crate::storage::MemoryStore;

    fn triggers() -> RecurringTriggers {
        let config = SchedulerConfig::default();
        let queue = JobQueue::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SourceRegistry::with_defaults()),
            config.clone(),
        );
        RecurringTriggers::new(queue, &config).unwrap()
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 2 * * *").is_ok());
        assert!(parse_cron("0 0 2 * * *").is_ok());
        assert!(parse_cron("every night").is_err());
    }

    #[test]
    fn test_next_fire_picks_earliest() {
        let t = triggers();
        // Saturday 2025-01-04 12:00: stale sweep next at Sunday 02:00, cleanup at Sunday 03:00
        let now = Utc.with_ymd_and_hms(2025, 1, 4, 12, 0, 0).unwrap();
        let (trigger, at) = t.next_fire(now).unwrap();
        assert_eq!(trigger, Trigger::StaleSweep);
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 1, 5, 2, 0, 0).unwrap());

        let (trigger, at) = t.next_fire(at).unwrap();
        assert_eq!(trigger, Trigger::Cleanup);
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 1, 5, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_fire_stale_sweep() {
        let t = triggers();
        let mut entity = TrackedEntity::new("apn-1", EntityType::TaxAssessment);
        entity.postal_code = Some("90210".into());
        t.queue.track(&entity).await.unwrap();

        assert_eq!(t.fire(Trigger::StaleSweep).await.unwrap(), 1);
        assert_eq!(t.fire(Trigger::Cleanup).await.unwrap(), 0);
    }
}
