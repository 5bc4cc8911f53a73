//! Ticker universe loader: a flat CSV with a `ticker` column.

use crate::error::IngestError;
use crate::normalize::normalise_symbol;
use std::path::Path;
use tracing::{debug, info};

/// Read the ticker list. The header lookup is case-insensitive so both
/// `ticker` and `Ticker` files load; other columns are ignored.
pub fn load_universe(path: &Path) -> Result<Vec<String>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| IngestError::Planning(format!("cannot read ticker file {:?}: {}", path, e)))?;

    let headers = reader
        .headers()
        .map_err(|e| IngestError::Planning(format!("bad header in {:?}: {}", path, e)))?
        .clone();
    let col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("ticker"))
        .ok_or_else(|| IngestError::Planning(format!("no ticker column in {:?}", path)))?;

    let mut tickers = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| IngestError::Planning(format!("row {} in {:?}: {}", i + 1, path, e)))?;
        let symbol = record.get(col).map(normalise_symbol).unwrap_or_default();
        if symbol.is_empty() {
            return Err(IngestError::Planning(format!("row {} in {:?} has no ticker", i + 1, path)));
        }
        tickers.push(symbol);
    }

    debug!("Ticker file {:?}: {} rows", path, tickers.len());
    info!("{} tickers in universe", tickers.len());
    Ok(tickers)
}
