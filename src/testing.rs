//! Test doubles shared by the fetch and pipeline tests.

use crate::error::{SourceError, StoreError};
use crate::models::{FetchWindow, PricePoint, RawBar, RawSeries, TickerMetadataRecord};
use crate::source::MarketDataSource;
use crate::storage::TableStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Consecutive daily bars starting at `start`, close = base + i.
pub fn daily_bars(start: NaiveDate, n: usize, base: f64) -> RawSeries {
    (0..n)
        .map(|i| {
            let date = start + chrono::Days::new(i as u64);
            let px = base + i as f64;
            RawBar {
                timestamp: date.and_hms_opt(14, 30, 0).unwrap(),
                open: Some(px),
                high: Some(px + 10.0),
                low: Some(px - 10.0),
                close: Some(px),
                volume: Some(100.0 + i as f64),
            }
        })
        .collect()
}

enum Canned {
    Series(RawSeries),
    Fail,
}

/// In-memory source returning canned series and recording every request.
#[derive(Default)]
pub struct StaticSource {
    canned: HashMap<String, Canned>,
    pub requests: Mutex<Vec<(String, FetchWindow)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, ticker: &str, series: RawSeries) -> Self {
        self.canned.insert(ticker.to_string(), Canned::Series(series));
        self
    }

    pub fn with_failure(mut self, ticker: &str) -> Self {
        self.canned.insert(ticker.to_string(), Canned::Fail);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requested(&self) -> Vec<(String, FetchWindow)> {
        let mut r = self.requests.lock().unwrap().clone();
        r.sort_by(|a, b| a.0.cmp(&b.0));
        r
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self, ticker: &str, window: FetchWindow) -> Result<RawSeries, SourceError> {
        self.requests.lock().unwrap().push((ticker.to_string(), window));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.canned.get(ticker) {
            Some(Canned::Series(s)) => Ok(s.clone()),
            Some(Canned::Fail) => Err(SourceError::Network("connection reset".into())),
            None => Err(SourceError::SymbolNotFound(ticker.to_string())),
        }
    }
}

/// In-memory table store with switchable write failures.
#[derive(Default)]
pub struct MemoryStore {
    pub data: Mutex<Option<Vec<PricePoint>>>,
    pub metadata: Mutex<Option<Vec<TickerMetadataRecord>>>,
    pub fail_data_writes: bool,
    pub fail_metadata_writes: bool,
    pub data_loads: AtomicUsize,
}

impl MemoryStore {
    pub fn with_tables(data: Vec<PricePoint>, metadata: Vec<TickerMetadataRecord>) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            metadata: Mutex::new(Some(metadata)),
            ..Default::default()
        }
    }
}

impl TableStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load_data(&self) -> Result<Option<Vec<PricePoint>>, StoreError> {
        self.data_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.lock().unwrap().clone())
    }

    fn load_metadata(&self) -> Result<Option<Vec<TickerMetadataRecord>>, StoreError> {
        Ok(self.metadata.lock().unwrap().clone())
    }

    fn save_data(&self, rows: &[PricePoint]) -> Result<(), StoreError> {
        if self.fail_data_writes {
            return Err(StoreError::Unavailable("data volume is read-only".into()));
        }
        *self.data.lock().unwrap() = Some(rows.to_vec());
        Ok(())
    }

    fn save_metadata(&self, rows: &[TickerMetadataRecord]) -> Result<(), StoreError> {
        if self.fail_metadata_writes {
            return Err(StoreError::Unavailable("metadata volume is read-only".into()));
        }
        *self.metadata.lock().unwrap() = Some(rows.to_vec());
        Ok(())
    }
}
