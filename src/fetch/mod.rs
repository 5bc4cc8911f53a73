//! Per-ticker fetch worker and the bounded fan-out coordinator.
//!
//! Each plan entry runs as its own task behind a semaphore. Tasks share
//! nothing but the source handle; results come back through their join
//! handles and are collected in plan order once every task has finished.

use crate::error::IngestError;
use crate::models::{
    FetchWindow, IngestionPlanEntry, PricePoint, RawSeries, TickerBatch, TickerMetadataRecord,
};
use crate::normalize::normalize_series;
use crate::source::MarketDataSource;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

// ── Worker ────────────────────────────────────────────────────────────────────

/// Fetch and normalize one ticker. Every failure comes back as a per-ticker
/// `IngestError`.
pub async fn fetch_ticker(
    source: &dyn MarketDataSource,
    entry: &IngestionPlanEntry,
    ingestion_date: NaiveDate,
) -> Result<TickerBatch, IngestError> {
    let raw = source
        .fetch(&entry.ticker, entry.window)
        .await
        .map_err(|e| IngestError::SourceUnavailable {
            ticker: entry.ticker.clone(),
            reason: e.to_string(),
        })?;

    let raw = within_window(raw, entry.window);
    if raw.is_empty() {
        return Err(IngestError::SourceUnavailable {
            ticker: entry.ticker.clone(),
            reason: format!("{} returned no rows ({})", source.name(), entry.window),
        });
    }

    normalize_series(&entry.ticker, raw, ingestion_date)
}

/// Drop rows dated before a `Since` start. Sources may answer with bars that
/// are already stored; those must not reach the merge.
fn within_window(raw: RawSeries, window: FetchWindow) -> RawSeries {
    let FetchWindow::Since(start) = window else {
        return raw;
    };
    let total = raw.len();
    let kept: RawSeries = raw.into_iter().filter(|b| b.timestamp.date() >= start).collect();
    if kept.len() < total {
        debug!("Dropped {} rows before {}", total - kept.len(), start);
    }
    kept
}

// ── Coordinator ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub data: Vec<PricePoint>,
    pub metadata: Vec<TickerMetadataRecord>,
    pub succeeded: Vec<String>,
    pub failures: Vec<IngestError>,
}

pub struct ConcurrentFetchCoordinator {
    source: Arc<dyn MarketDataSource>,
    max_concurrency: usize,
}

impl ConcurrentFetchCoordinator {
    pub fn new(source: Arc<dyn MarketDataSource>, max_concurrency: usize) -> Self {
        Self {
            source,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Pool size for a plan of `n` entries.
    pub fn pool_size(&self, n: usize) -> usize {
        n.min(self.max_concurrency).max(1)
    }

    /// Run every plan entry and aggregate the successes.
    ///
    /// An empty plan yields an empty outcome. A non-empty plan in which no
    /// ticker succeeded yields `IngestError::EmptyBatch`.
    pub async fn run(
        &self,
        plan: &[IngestionPlanEntry],
        ingestion_date: NaiveDate,
    ) -> Result<FetchOutcome, IngestError> {
        let mut outcome = FetchOutcome::default();
        if plan.is_empty() {
            return Ok(outcome);
        }

        let pool = self.pool_size(plan.len());
        info!("Fetching {} tickers from {} (pool {})", plan.len(), self.source.name(), pool);

        let sem = Arc::new(Semaphore::new(pool));
        let mut handles = Vec::with_capacity(plan.len());

        for entry in plan {
            let ticker = entry.ticker.clone();
            let entry = entry.clone();
            let source = Arc::clone(&self.source);
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| {
                    IngestError::SourceUnavailable {
                        ticker: entry.ticker.clone(),
                        reason: format!("worker pool closed: {e}"),
                    }
                })?;
                fetch_ticker(source.as_ref(), &entry, ingestion_date).await
            });

            handles.push((ticker, handle));
        }

        for (ticker, handle) in handles {
            match handle.await {
                Ok(Ok(batch)) => {
                    info!(
                        "{}: {} rows ({}..{})",
                        ticker, batch.metadata.row_count, batch.metadata.first_day, batch.metadata.last_day
                    );
                    outcome.data.extend(batch.rows);
                    outcome.metadata.push(batch.metadata);
                    outcome.succeeded.push(ticker);
                }
                Ok(Err(e)) => {
                    warn!("{}: {}", ticker, e);
                    outcome.failures.push(e);
                }
                Err(e) => {
                    error!("Task panic for {}: {}", ticker, e);
                    outcome.failures.push(IngestError::SourceUnavailable {
                        ticker,
                        reason: format!("fetch task aborted: {e}"),
                    });
                }
            }
        }

        info!(
            "Fetched {}/{} tickers ({} failed, {} rows)",
            outcome.succeeded.len(),
            plan.len(),
            outcome.failures.len(),
            outcome.data.len()
        );

        if outcome.succeeded.is_empty() {
            return Err(IngestError::EmptyBatch { planned: plan.len() });
        }
        Ok(outcome)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticSource, daily_bars, day};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn entry(t: &str, window: FetchWindow) -> IngestionPlanEntry {
        IngestionPlanEntry { ticker: t.into(), window }
    }

    #[test]
    fn test_worker_passes_window_through() {
        let source = StaticSource::new().with_series("AAPL", daily_bars(day(2021, 1, 4), 2, 10.0));
        let e = entry("AAPL", FetchWindow::Since(day(2021, 1, 4)));

        let batch = tokio_test::block_on(fetch_ticker(&source, &e, day(2021, 1, 6))).unwrap();
        assert_eq!(batch.metadata.first_day, day(2021, 1, 4));
        assert_eq!(source.requested(), vec![("AAPL".to_string(), FetchWindow::Since(day(2021, 1, 4)))]);
    }

    #[test]
    fn test_worker_empty_series_is_source_unavailable() {
        let source = StaticSource::new().with_series("AAPL", vec![]);
        let e = entry("AAPL", FetchWindow::FullHistory);
        let err = tokio_test::block_on(fetch_ticker(&source, &e, day(2021, 1, 6))).unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    }

    #[test]
    fn test_worker_drops_rows_before_window() {
        // source re-sends a revised 01-03 bar alongside the requested 01-04
        let source = StaticSource::new().with_series("AAPL", daily_bars(day(2021, 1, 3), 2, 900.0));
        let e = entry("AAPL", FetchWindow::Since(day(2021, 1, 4)));

        let batch = tokio_test::block_on(fetch_ticker(&source, &e, day(2021, 1, 5))).unwrap();
        let dates: Vec<_> = batch.rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2021, 1, 4)]);
        assert_eq!(batch.metadata.first_day, day(2021, 1, 4));
        assert_eq!(batch.metadata.row_count, 1);
    }

    #[test]
    fn test_worker_nothing_inside_window_is_source_unavailable() {
        let source = StaticSource::new().with_series("AAPL", daily_bars(day(2021, 1, 1), 3, 1.0));
        let e = entry("AAPL", FetchWindow::Since(day(2021, 1, 4)));
        let err = tokio_test::block_on(fetch_ticker(&source, &e, day(2021, 1, 5))).unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable { ref ticker, .. } if ticker == "AAPL"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_others() {
        let source = Arc::new(
            StaticSource::new()
                .with_series("AAPL", daily_bars(day(2021, 1, 1), 3, 500.0))
                .with_failure("BAD")
                .with_series("MSFT", daily_bars(day(2021, 1, 1), 3, 200.0)),
        );
        let coord = ConcurrentFetchCoordinator::new(source, 4);
        let plan = vec![
            entry("AAPL", FetchWindow::FullHistory),
            entry("BAD", FetchWindow::FullHistory),
            entry("MSFT", FetchWindow::FullHistory),
        ];

        let out = coord.run(&plan, day(2021, 1, 4)).await.unwrap();
        assert_eq!(out.succeeded, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(out.data.len(), 6);
        assert_eq!(out.metadata.len(), 2);
        assert!(out.data.iter().all(|r| r.ticker != "BAD"));
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].ticker(), Some("BAD"));
    }

    #[tokio::test]
    async fn test_all_failed_is_empty_batch() {
        let source = Arc::new(StaticSource::new().with_failure("A"));
        let coord = ConcurrentFetchCoordinator::new(source, 2);
        let plan = vec![entry("A", FetchWindow::FullHistory), entry("B", FetchWindow::FullHistory)];

        let err = coord.run(&plan, day(2021, 1, 4)).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyBatch { planned: 2 }));
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop() {
        let source = Arc::new(StaticSource::new());
        let coord = ConcurrentFetchCoordinator::new(source.clone(), 2);
        let out = coord.run(&[], day(2021, 1, 4)).await.unwrap();
        assert!(out.data.is_empty() && out.metadata.is_empty());
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let mut source = StaticSource::new().with_delay(Duration::from_millis(20));
        let mut plan = Vec::new();
        for i in 0..10 {
            let t = format!("T{i}");
            source = source.with_series(&t, daily_bars(day(2021, 1, 1), 1, 1.0));
            plan.push(entry(&t, FetchWindow::FullHistory));
        }
        let source = Arc::new(source);
        let coord = ConcurrentFetchCoordinator::new(source.clone(), 3);

        let out = coord.run(&plan, day(2021, 1, 4)).await.unwrap();
        assert_eq!(out.succeeded.len(), 10);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_pool_size() {
        let coord = ConcurrentFetchCoordinator::new(Arc::new(StaticSource::new()), 8);
        assert_eq!(coord.pool_size(3), 3);
        assert_eq!(coord.pool_size(100), 8);
        assert_eq!(coord.pool_size(0), 1);
    }
}
