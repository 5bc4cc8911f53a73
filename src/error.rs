//! Error taxonomy for an ingestion run.
//!
//! Per-ticker variants (`SourceUnavailable`, `NormalizationFailure`) are
//! recovered inside the fetch coordinator. Everything else ends the run and is
//! returned to the caller as a value.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source unavailable for {ticker}: {reason}")]
    SourceUnavailable { ticker: String, reason: String },

    #[error("normalization failed for {ticker}: {reason}")]
    NormalizationFailure { ticker: String, reason: String },

    #[error("all {planned} planned fetches failed")]
    EmptyBatch { planned: usize },

    #[error("persistence failed (written: {written:?}, failed: {failed:?}): {reason}")]
    Persistence {
        written: Vec<&'static str>,
        failed: Vec<&'static str>,
        reason: String,
    },

    #[error("planning failed: {0}")]
    Planning(String),
}

impl IngestError {
    /// The ticker a per-ticker failure belongs to; `None` for run-level errors.
    pub fn ticker(&self) -> Option<&str> {
        match self {
            IngestError::SourceUnavailable { ticker, .. }
            | IngestError::NormalizationFailure { ticker, .. } => Some(ticker),
            _ => None,
        }
    }
}

/// Failures reported by a market data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,
}

/// Failures reported by a table store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {table} table: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
