pub mod http_client;
pub mod yahoo;

use crate::error::SourceError;
use crate::models::{FetchWindow, RawSeries};
use async_trait::async_trait;

pub use self::yahoo::YahooSource;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable market data source: daily OHLCV for one ticker over a window.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, ticker: &str, window: FetchWindow) -> Result<RawSeries, SourceError>;
}
