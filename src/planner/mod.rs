//! Ingestion planner: decides which tickers to fetch and over which window.
//!
//! 1. Reduce metadata to the latest record per ticker.
//! 2. Drop tickers whose `last_day` lags their `ingestion_date` by more than
//!    the staleness threshold (possibly delisted; retried on a later run only
//!    once the metadata changes).
//! 3. Tickers without metadata get `FullHistory`; the rest get
//!    `Since(last_day + 1)`.

use crate::error::IngestError;
use crate::models::{FetchWindow, IngestionPlanEntry, TickerMetadataRecord};
use crate::normalize::normalise_symbol;
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct PlannerPolicy {
    pub stale_after_days: i64,
    /// When set, tickers whose next window starts after this date are skipped.
    pub up_to_date_as_of: Option<NaiveDate>,
}

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            up_to_date_as_of: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionPlan {
    pub entries: Vec<IngestionPlanEntry>,
    pub stale: Vec<String>,
    pub up_to_date: Vec<String>,
}

impl IngestionPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn new_tickers(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.window == FetchWindow::FullHistory)
            .count()
    }
}

/// Keep the record with the greatest `ingestion_date` for each ticker.
/// Ties resolve to the record appearing last in the input.
pub fn latest_per_ticker(
    metadata: &[TickerMetadataRecord],
) -> BTreeMap<String, &TickerMetadataRecord> {
    let mut sorted: Vec<(String, &TickerMetadataRecord)> = metadata
        .iter()
        .map(|rec| (normalise_symbol(&rec.ticker), rec))
        .collect();
    sorted.sort_by(|(ta, a), (tb, b)| (ta, a.ingestion_date).cmp(&(tb, b.ingestion_date)));

    sorted.into_iter().collect()
}

pub fn is_stale(rec: &TickerMetadataRecord, stale_after_days: i64) -> bool {
    (rec.ingestion_date - rec.last_day).num_days() > stale_after_days
}

/// Build the plan for `universe` against an optional metadata snapshot.
pub fn plan(
    universe: &[String],
    metadata: Option<&[TickerMetadataRecord]>,
    policy: &PlannerPolicy,
) -> Result<IngestionPlan, IngestError> {
    let latest = metadata.map(latest_per_ticker).unwrap_or_default();

    let mut seen = HashSet::new();
    let mut out = IngestionPlan::default();

    for (i, raw) in universe.iter().enumerate() {
        let ticker = normalise_symbol(raw);
        if ticker.is_empty() {
            return Err(IngestError::Planning(format!(
                "blank ticker identifier at position {}",
                i + 1
            )));
        }
        if !seen.insert(ticker.clone()) {
            continue;
        }

        let window = match latest.get(&ticker) {
            None => FetchWindow::FullHistory,
            Some(rec) if is_stale(rec, policy.stale_after_days) => {
                debug!(
                    "{}: last_day {} is stale at ingestion {}, skipping",
                    ticker, rec.last_day, rec.ingestion_date
                );
                out.stale.push(ticker);
                continue;
            }
            Some(rec) => {
                let since = rec.last_day.checked_add_days(Days::new(1)).ok_or_else(|| {
                    IngestError::Planning(format!("{}: last_day {} out of range", ticker, rec.last_day))
                })?;
                if policy.up_to_date_as_of.is_some_and(|as_of| since > as_of) {
                    out.up_to_date.push(ticker);
                    continue;
                }
                FetchWindow::Since(since)
            }
        };

        out.entries.push(IngestionPlanEntry { ticker, window });
    }

    info!(
        "Plan: {} tickers ({} new, {} incremental), {} stale, {} up to date",
        out.len(),
        out.new_tickers(),
        out.len() - out.new_tickers(),
        out.stale.len(),
        out.up_to_date.len()
    );

    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
