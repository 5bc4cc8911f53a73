//! Yahoo Finance v8 chart API source.
//!
//! `range=max` serves full history; `period1`/`period2` serve an open-ended
//! window starting at a given day. Timestamps are shifted by the exchange's
//! `gmtoffset` so each bar lands on its local trading date.

use super::http_client::HttpClient;
use super::MarketDataSource;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::models::{FetchWindow, RawBar, RawSeries};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
pub(crate) struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: HttpClient,
    base_url: String,
}

impl YahooSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid source base_url {}", config.base_url))?;
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, ticker: &str, window: FetchWindow) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, ticker))
            .map_err(|e| SourceError::Malformed(format!("bad chart url for {ticker}: {e}")))?;

        {
            let mut q = url.query_pairs_mut();
            q.append_pair("interval", "1d");
            match window {
                FetchWindow::FullHistory => {
                    q.append_pair("range", "max");
                }
                FetchWindow::Since(day) => {
                    // Bars of exchanges east of UTC are stamped on the previous
                    // UTC day; start a day early and let the worker trim.
                    let from = day.checked_sub_days(Days::new(1)).unwrap_or(day);
                    let start = from.and_time(NaiveTime::MIN).and_utc().timestamp();
                    q.append_pair("period1", &start.to_string());
                    q.append_pair("period2", &Utc::now().timestamp().to_string());
                }
            }
        }
        Ok(url)
    }
}

/// Flatten a chart response into raw rows, keeping null cells as `None`.
pub(crate) fn parse_chart(ticker: &str, resp: ChartResponse) -> Result<RawSeries, SourceError> {
    let result = match resp.chart.result {
        Some(r) => r,
        None => {
            return Err(match resp.chart.error {
                Some(err) if err.code == "Not Found" => SourceError::SymbolNotFound(ticker.to_string()),
                Some(err) => SourceError::Malformed(format!("{}: {}", err.code, err.description)),
                None => SourceError::Empty,
            });
        }
    };

    let data = result.into_iter().next().ok_or(SourceError::Empty)?;
    let Some(timestamps) = data.timestamp else {
        return Err(SourceError::Empty);
    };
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Malformed("no quote block".into()))?;

    let n = timestamps.len();
    for (name, len) in [
        ("open", quote.open.len()),
        ("high", quote.high.len()),
        ("low", quote.low.len()),
        ("close", quote.close.len()),
        ("volume", quote.volume.len()),
    ] {
        if len != n {
            return Err(SourceError::Malformed(format!(
                "{name} has {len} values for {n} timestamps"
            )));
        }
    }

    let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let mut series = Vec::with_capacity(n);
    for (i, ts) in timestamps.into_iter().enumerate() {
        let timestamp = DateTime::from_timestamp(ts + offset, 0)
            .ok_or_else(|| SourceError::Malformed(format!("invalid timestamp {ts}")))?
            .naive_utc();
        series.push(RawBar {
            timestamp,
            open: quote.open[i],
            high: quote.high[i],
            low: quote.low[i],
            close: quote.close[i],
            volume: quote.volume[i],
        });
    }

    if series.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(series)
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch(&self, ticker: &str, window: FetchWindow) -> Result<RawSeries, SourceError> {
        let url = self.chart_url(ticker, window)?;
        let resp: ChartResponse = self.client.get_json(url.as_str()).await?;
        let series = parse_chart(ticker, resp)?;
        debug!("{}: {} raw rows ({})", ticker, series.len(), window);
        Ok(series)
    }
}
