//! Pipeline orchestrator: store → planner → fetch → merge → store.
//!
//! ## Run sequence
//!
//!   1. Load the stored data + metadata tables (absent on a first run)
//!   2. Plan: one window per ticker in the universe
//!   3. Fan the plan out over the bounded fetch pool
//!   4. Merge the fetched rows into the stored snapshot
//!   5. Persist data, then metadata
//!
//! All store writes happen once, from this flow, after every fetch finished.
//! Metadata is written only after the data table landed, so a failed data
//! write never leaves metadata pointing at rows that were not stored.

use crate::config::{AppConfig, PipelineConfig};
use crate::error::{IngestError, StoreError};
use crate::fetch::ConcurrentFetchCoordinator;
use crate::merge::{Snapshot, merge};
use crate::models::{PricePoint, TickerMetadataRecord};
use crate::planner::{IngestionPlan, PlannerPolicy, plan};
use crate::source::{MarketDataSource, YahooSource};
use crate::storage::{Table, TableStore, open_store};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn TableStore>,
}

#[derive(Debug, Default, PartialEq)]
pub struct RunReport {
    pub planned: usize,
    pub stale: usize,
    pub up_to_date: usize,
    pub fetched: usize,
    pub failed: Vec<String>,
    pub data_rows: usize,
    pub metadata_rows: usize,
    pub persisted: bool,
}

fn policy(config: &PipelineConfig, ingestion_date: NaiveDate) -> PlannerPolicy {
    PlannerPolicy {
        stale_after_days: config.stale_after_days,
        up_to_date_as_of: config.skip_up_to_date.then_some(ingestion_date),
    }
}

fn unreadable(table: Table, e: StoreError) -> IngestError {
    IngestError::Planning(format!("cannot load stored {} table: {}", table, e))
}

/// Plan against the stored metadata without fetching anything. The price
/// table is never read.
pub fn plan_from_store(
    store: &dyn TableStore,
    config: &PipelineConfig,
    universe: &[String],
    ingestion_date: NaiveDate,
) -> Result<IngestionPlan, IngestError> {
    let metadata = store
        .load_metadata()
        .map_err(|e| unreadable(Table::Metadata, e))?;
    plan(universe, metadata.as_deref(), &policy(config, ingestion_date))
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn TableStore>,
    ) -> Self {
        Self { config, source, store }
    }

    /// Wire up the configured Yahoo source and table store.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let source = Arc::new(YahooSource::new(&config.source).context("Failed to build source")?);
        let store: Arc<dyn TableStore> =
            Arc::from(open_store(&config.storage).context("Failed to open table store")?);
        Ok(Self::new(config, source, store))
    }

    /// A table that exists but cannot be read stops the run: treating it as
    /// absent would replace it with this run's rows alone.
    fn load_existing(
        &self,
    ) -> Result<(Option<Vec<PricePoint>>, Option<Vec<TickerMetadataRecord>>), IngestError> {
        let data = self.store.load_data().map_err(|e| unreadable(Table::Data, e))?;
        let metadata = self
            .store
            .load_metadata()
            .map_err(|e| unreadable(Table::Metadata, e))?;

        if metadata.is_none() {
            info!("No stored metadata in {}: all tickers get full history", self.store.describe());
        }
        Ok((data, metadata))
    }

    pub async fn run(&self, universe: &[String], ingestion_date: NaiveDate) -> Result<RunReport, IngestError> {
        // ── 1. Load stored tables ──────────────────────────────────────────────
        let (existing_data, existing_metadata) = self.load_existing()?;

        // ── 2. Plan ────────────────────────────────────────────────────────────
        let plan = plan(
            universe,
            existing_metadata.as_deref(),
            &policy(&self.config.pipeline, ingestion_date),
        )?;
        let mut report = RunReport {
            planned: plan.len(),
            stale: plan.stale.len(),
            up_to_date: plan.up_to_date.len(),
            ..Default::default()
        };

        if plan.is_empty() {
            info!("Nothing to ingest; store left untouched");
            return Ok(report);
        }

        // ── 3. Fetch ───────────────────────────────────────────────────────────
        let coordinator = ConcurrentFetchCoordinator::new(
            Arc::clone(&self.source),
            self.config.pipeline.max_concurrency,
        );
        let outcome = coordinator.run(&plan.entries, ingestion_date).await.inspect_err(|e| {
            error!("{}", e);
        })?;

        report.fetched = outcome.succeeded.len();
        report.failed = outcome
            .failures
            .iter()
            .filter_map(|e| e.ticker().map(str::to_string))
            .collect();
        if !report.failed.is_empty() {
            warn!("{} tickers failed and will be retried next run: {:?}", report.failed.len(), report.failed);
        }

        // ── 4. Merge ───────────────────────────────────────────────────────────
        let merged = merge(
            existing_data,
            existing_metadata,
            Snapshot {
                data: outcome.data,
                metadata: outcome.metadata,
            },
            self.config.merge.dedup,
        );
        report.data_rows = merged.data.len();
        report.metadata_rows = merged.metadata.len();

        // ── 5. Persist ─────────────────────────────────────────────────────────
        self.persist(&merged)?;
        report.persisted = true;

        info!(
            "=== Done: {} planned | {} fetched | {} failed | {} data rows | {} metadata rows ===",
            report.planned,
            report.fetched,
            report.failed.len(),
            report.data_rows,
            report.metadata_rows
        );
        Ok(report)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), IngestError> {
        if let Err(e) = self.store.save_data(&snapshot.data) {
            error!("Failed to write {} table: {}", Table::Data, e);
            return Err(IngestError::Persistence {
                written: vec![],
                failed: vec![Table::Data.name()],
                reason: format!("{e}; {} table not attempted", Table::Metadata),
            });
        }

        if let Err(e) = self.store.save_metadata(&snapshot.metadata) {
            error!("Data table written but {} table failed: {}", Table::Metadata, e);
            return Err(IngestError::Persistence {
                written: vec![Table::Data.name()],
                failed: vec![Table::Metadata.name()],
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
