//! Batch quality reporting.
//!
//! Normalization outcomes are collected per `(source, data_type)` into a
//! window of fixed span. Each closed window becomes one immutable
//! [`QualityReport`]; the history is used to watch a source degrade over time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EntityType, NormalizationOutcome, QualityReport};
use crate::pipeline::normalize::dedup_key;
use crate::storage::RecordStore;

/// Aggregate a batch into report counts.
///
/// A record is a duplicate when an earlier record in the same batch shares
/// its normalized `(address, city, region)` key.
pub fn build_report(
    source_id: &str,
    data_type: EntityType,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    outcomes: &[NormalizationOutcome],
) -> QualityReport {
    let total = outcomes.len();
    let valid = outcomes.iter().filter(|o| o.validation.is_valid).count();

    let mut seen = HashSet::new();
    let duplicates = outcomes
        .iter()
        .filter_map(|o| dedup_key(&o.record.data))
        .filter(|key| !seen.insert(key.clone()))
        .count();

    let missing_required = outcomes
        .iter()
        .filter(|o| !o.validation.missing_required.is_empty())
        .count();

    let (completeness_score, avg_confidence) = if total == 0 {
        (0.0, 0.0)
    } else {
        let confidence: f64 = outcomes.iter().map(|o| o.record.confidence).sum();
        (
            valid as f64 / total as f64 * 100.0,
            confidence / total as f64,
        )
    };

    QualityReport {
        id: Uuid::new_v4(),
        source_id: source_id.to_string(),
        data_type,
        window_start,
        window_end,
        total,
        valid,
        invalid: total - valid,
        duplicates,
        missing_required,
        completeness_score,
        avg_confidence,
        created_at: Utc::now(),
    }
}

/// Outcomes collected since a window opened.
struct OpenWindow {
    started_at: DateTime<Utc>,
    outcomes: Vec<NormalizationOutcome>,
}

impl OpenWindow {
    fn is_due(&self, now: DateTime<Utc>, span: Duration) -> bool {
        (now - self.started_at).to_std().is_ok_and(|age| age >= span)
    }
}

type WindowKey = (String, EntityType);

/// Collects outcomes into windows, then builds quality reports and appends
/// them to the record store.
#[derive(Clone)]
pub struct QualityReporter {
    store: Arc<dyn RecordStore>,
    span: Duration,
    open: Arc<Mutex<HashMap<WindowKey, OpenWindow>>>,
}

impl QualityReporter {
    pub fn new(store: Arc<dyn RecordStore>, span: Duration) -> Self {
        Self {
            store,
            span,
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, OpenWindow>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Windows still collecting outcomes.
    pub fn open_windows(&self) -> usize {
        self.lock().len()
    }

    /// Add one outcome to its window.
    ///
    /// A window whose span has elapsed is reported first and the outcome
    /// opens a fresh one.
    pub async fn observe(
        &self,
        source_id: &str,
        data_type: EntityType,
        outcome: NormalizationOutcome,
    ) -> Result<Option<QualityReport>> {
        let now = Utc::now();
        let key = (source_id.to_string(), data_type);
        let closed = {
            let mut open = self.lock();
            let closed = match open.get(&key) {
                Some(window) if window.is_due(now, self.span) => open.remove(&key),
                _ => None,
            };
            open.entry(key)
                .or_insert_with(|| OpenWindow {
                    started_at: now,
                    outcomes: Vec::new(),
                })
                .outcomes
                .push(outcome);
            closed
        };

        match closed {
            Some(window) => {
                let report = self
                    .record_batch(source_id, data_type, window.started_at, &window.outcomes)
                    .await?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Report every window whose span has elapsed.
    pub async fn flush_due(&self) -> Result<Vec<QualityReport>> {
        let now = Utc::now();
        self.flush(|window| window.is_due(now, self.span)).await
    }

    /// Report every open window regardless of age.
    pub async fn flush_all(&self) -> Result<Vec<QualityReport>> {
        self.flush(|_| true).await
    }

    async fn flush(&self, due: impl Fn(&OpenWindow) -> bool) -> Result<Vec<QualityReport>> {
        let mut closed: Vec<(WindowKey, OpenWindow)> = {
            let mut open = self.lock();
            let keys: Vec<WindowKey> = open
                .iter()
                .filter(|(_, window)| due(window))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| open.remove(&key).map(|window| (key, window)))
                .collect()
        };
        closed.sort_by_key(|(_, window)| window.started_at);

        let mut reports = Vec::with_capacity(closed.len());
        for ((source_id, data_type), window) in closed {
            reports.push(
                self.record_batch(&source_id, data_type, window.started_at, &window.outcomes)
                    .await?,
            );
        }
        Ok(reports)
    }

    /// Build and persist the report for one batch.
    pub async fn record_batch(
        &self,
        source_id: &str,
        data_type: EntityType,
        window_start: DateTime<Utc>,
        outcomes: &[NormalizationOutcome],
    ) -> Result<QualityReport> {
        let report = build_report(source_id, data_type, window_start, Utc::now(), outcomes);
        self.store.append_quality_report(&report).await?;

        if report.invalid > 0 {
            log::warn!(
                "[{}] {} batch: {}/{} valid ({:.0}% complete)",
                source_id,
                data_type,
                report.valid,
                report.total,
                report.completeness_score
            );
        } else {
            log::debug!(
                "[{}] {} batch: {} valid, avg confidence {:.2}",
                source_id,
                data_type,
                report.valid,
                report.avg_confidence
            );
        }
        Ok(report)
    }

    /// Past reports, newest first; all sources when `source_id` is `None`.
    pub async fn history(&self, source_id: Option<&str>, limit: usize) -> Result<Vec<QualityReport>> {
        self.store.quality_reports(source_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawExtractionResult;
    use crate::pipeline::normalize::Normalizer;
    use crate::services::SourceRegistry;
    use crate::storage::MemoryStore;

    fn outcomes() -> Vec<NormalizationOutcome> {
        let source = SourceRegistry::with_defaults()
            .get("commercial-listings")
            .unwrap();
        let normalizer = Normalizer::default();
        let raw = |address: &str| {
            RawExtractionResult::new("commercial-listings", "u")
                .with_field("address", address)
                .with_field("city", "Austin")
                .with_field("state", "TX")
                .with_field("list_price", "$2,850,000")
        };
        vec![
            normalizer.normalize(&raw("1 Main St"), &source, EntityType::Property),
            normalizer.normalize(&raw("1 MAIN STREET"), &source, EntityType::Property),
            normalizer.normalize(&raw("9 Elm Ave"), &source, EntityType::Property),
            normalizer.normalize(&raw(""), &source, EntityType::Property),
        ]
    }

    #[test]
    fn test_build_report_counts() {
        let now = Utc::now();
        let report = build_report("commercial-listings", EntityType::Property, now, now, &outcomes());

        assert_eq!(report.total, 4);
        assert_eq!(report.valid, 3);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.missing_required, 1);
        assert!((report.completeness_score - 75.0).abs() < 1e-9);
        assert!(report.avg_confidence > 0.0 && report.avg_confidence <= 1.0);
    }

    #[test]
    fn test_empty_batch() {
        let now = Utc::now();
        let report = build_report("x", EntityType::Transaction, now, now, &[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.completeness_score, 0.0);
    }

    fn reporter(span: Duration) -> QualityReporter {
        QualityReporter::new(Arc::new(MemoryStore::new()), span)
    }

    #[tokio::test]
    async fn test_window_collects_until_flushed() {
        let reporter = reporter(Duration::from_secs(3600));
        for outcome in outcomes() {
            let closed = reporter
                .observe("commercial-listings", EntityType::Property, outcome)
                .await
                .unwrap();
            assert!(closed.is_none());
        }
        assert_eq!(reporter.open_windows(), 1);
        assert!(reporter.flush_due().await.unwrap().is_empty());

        let reports = reporter.flush_all().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total, 4);
        assert_eq!(reports[0].duplicates, 1);
        assert!(reports[0].window_end >= reports[0].window_start);
        assert_eq!(reporter.open_windows(), 0);
        assert_eq!(reporter.history(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_windows_split_by_source_and_type() {
        let reporter = reporter(Duration::from_secs(3600));
        let mut all = outcomes().into_iter();
        let first = all.next().unwrap();
        reporter
            .observe("commercial-listings", EntityType::Property, first.clone())
            .await
            .unwrap();
        reporter
            .observe("commercial-listings", EntityType::Transaction, first.clone())
            .await
            .unwrap();
        reporter
            .observe("market-research", EntityType::Property, first)
            .await
            .unwrap();

        let reports = reporter.flush_all().await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.total == 1 && r.duplicates == 0));
    }

    #[tokio::test]
    async fn test_elapsed_window_closes_on_next_outcome() {
        let reporter = reporter(Duration::ZERO);
        let mut all = outcomes().into_iter();
        let first = reporter
            .observe("commercial-listings", EntityType::Property, all.next().unwrap())
            .await
            .unwrap();
        assert!(first.is_none());

        let closed = reporter
            .observe("commercial-listings", EntityType::Property, all.next().unwrap())
            .await
            .unwrap()
            .expect("zero-span window closes on the next outcome");
        assert_eq!(closed.total, 1);
        assert_eq!(reporter.open_windows(), 1);
        assert_eq!(reporter.flush_due().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let reporter = reporter(Duration::from_secs(3600));
        let start = Utc::now();
        let first = reporter
            .record_batch("commercial-listings", EntityType::Property, start, &outcomes())
            .await
            .unwrap();
        let second = reporter
            .record_batch("commercial-listings", EntityType::Property, start, &outcomes()[..1])
            .await
            .unwrap();
        reporter
            .record_batch("market-research", EntityType::ResearchReport, start, &[])
            .await
            .unwrap();

        let history = reporter.history(Some("commercial-listings"), 10).await.unwrap();
        assert_eq!(
            history.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(reporter.history(None, 10).await.unwrap().len(), 3);
    }
}
