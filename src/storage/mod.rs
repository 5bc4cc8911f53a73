//! Tabular store: two logical tables, loaded whole and replaced on write.

pub mod csv_store;
pub mod duckdb_store;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StoreError;
use crate::models::{PricePoint, TickerMetadataRecord};
use anyhow::Result;
use chrono::NaiveDate;
use std::fmt;

pub use self::csv_store::CsvTableStore;
pub use self::duckdb_store::DuckDbTableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Data,
    Metadata,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Data => "data",
            Table::Metadata => "metadata",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `None` from a load means the table has never been written.
pub trait TableStore: Send + Sync {
    fn describe(&self) -> String;

    fn load_data(&self) -> Result<Option<Vec<PricePoint>>, StoreError>;
    fn load_metadata(&self) -> Result<Option<Vec<TickerMetadataRecord>>, StoreError>;

    fn save_data(&self, rows: &[PricePoint]) -> Result<(), StoreError>;
    fn save_metadata(&self, rows: &[TickerMetadataRecord]) -> Result<(), StoreError>;
}

pub fn open_store(config: &StorageConfig) -> Result<Box<dyn TableStore>> {
    Ok(match config.backend {
        StorageBackend::Csv => Box::new(CsvTableStore::new(
            &config.data_dir,
            &config.data_file,
            &config.metadata_file,
        )),
        StorageBackend::Duckdb => Box::new(DuckDbTableStore::open(&config.db_path)?),
    })
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
pub struct StoreStats {
    pub rows: usize,
    pub tickers: usize,
    pub metadata_rows: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
}

pub fn summarize(store: &dyn TableStore) -> Result<StoreStats, StoreError> {
    let data = store.load_data()?.unwrap_or_default();
    let metadata = store.load_metadata()?.unwrap_or_default();

    let mut tickers: Vec<&str> = data.iter().map(|r| r.ticker.as_str()).collect();
    tickers.sort_unstable();
    tickers.dedup();

    Ok(StoreStats {
        rows: data.len(),
        tickers: tickers.len(),
        metadata_rows: metadata.len(),
        first_day: data.iter().map(|r| r.date).min(),
        last_day: data.iter().map(|r| r.date).max(),
    })
}
