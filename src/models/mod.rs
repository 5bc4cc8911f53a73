use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Fetch window ──────────────────────────────────────────────────────────────

/// Time range requested from the market data source for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchWindow {
    FullHistory,
    Since(NaiveDate),
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchWindow::FullHistory => write!(f, "full history"),
            FetchWindow::Since(d) => write!(f, "since {}", d.format("%Y-%m-%d")),
        }
    }
}

/// One (ticker, window) pair selected for the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionPlanEntry {
    pub ticker: String,
    pub window: FetchWindow,
}

// ── Stored rows ───────────────────────────────────────────────────────────────

/// One trading day for one ticker. Column order matches the stored table:
/// date, open, high, low, close, volume, ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    #[serde(with = "ymd")]
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: i64,
    pub ticker: String,
}

/// Latest known ingestion state of one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TickerMetadataRecord {
    pub ticker: String,
    #[serde(with = "ymd")]
    pub ingestion_date: NaiveDate,
    #[serde(with = "ymd")]
    pub first_day: NaiveDate,
    #[serde(with = "ymd")]
    pub last_day: NaiveDate,
    pub timespan_days: i64,
    pub row_count: i64,
    pub input_null_count: i64,
    pub processed_null_count: i64,
}

/// Normalized output of one successful ticker fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerBatch {
    pub rows: Vec<PricePoint>,
    pub metadata: TickerMetadataRecord,
}

// ── Raw source rows ───────────────────────────────────────────────────────────

/// Un-normalized daily row as returned by a market data source.
/// `timestamp` is exchange-local; any cell may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBar {
    pub timestamp: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawBar {
    pub fn null_count(&self) -> usize {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .filter(|v| v.is_none())
            .count()
    }
}

pub type RawSeries = Vec<RawBar>;

// ── Date format ───────────────────────────────────────────────────────────────

/// `YYYY-MM-DD` serde adapter shared by the CSV and JSON representations.
pub mod ymd {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(d)?;
        // Older files carried a time component on ingestion_date.
        let day = s.trim().get(..10).unwrap_or(s.trim());
        NaiveDate::parse_from_str(day, FORMAT).map_err(serde::de::Error::custom)
    }
}
