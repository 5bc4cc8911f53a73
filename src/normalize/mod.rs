//! Per-ticker normalization: raw source rows → stored price rows + summary.

use crate::error::IngestError;
use crate::models::{PricePoint, RawBar, RawSeries, TickerBatch, TickerMetadataRecord};
use chrono::NaiveDate;
use tracing::debug;

pub fn normalise_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Cast a raw volume cell to a non-negative integer (truncating).
fn coerce_volume(v: Option<f64>) -> Result<i64, String> {
    match v {
        None => Err("null volume".to_string()),
        Some(x) if !x.is_finite() => Err(format!("non-finite volume {x}")),
        Some(x) if x < 0.0 => Err(format!("negative volume {x}")),
        Some(x) if x > i64::MAX as f64 => Err(format!("volume out of range {x}")),
        Some(x) => Ok(x.trunc() as i64),
    }
}

fn is_placeholder(bar: &RawBar) -> bool {
    bar.null_count() == 5
}

/// Normalize one ticker's raw series and derive its metadata record.
///
/// Dates come out strictly increasing: rows are sorted by timestamp and a
/// later row on the same calendar date replaces the earlier one.
pub fn normalize_series(
    ticker: &str,
    raw: RawSeries,
    ingestion_date: NaiveDate,
) -> Result<TickerBatch, IngestError> {
    let fail = |reason: String| IngestError::NormalizationFailure {
        ticker: ticker.to_string(),
        reason,
    };

    let input_null_count: usize = raw.iter().map(RawBar::null_count).sum();

    let mut bars: Vec<RawBar> = raw.into_iter().filter(|b| !is_placeholder(b)).collect();
    bars.sort_by_key(|b| b.timestamp);

    let mut rows: Vec<PricePoint> = Vec::with_capacity(bars.len());
    for bar in bars {
        let date = bar.timestamp.date();
        let volume = coerce_volume(bar.volume).map_err(|e| fail(format!("{e} on {date}")))?;
        let point = PricePoint {
            date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume,
            ticker: ticker.to_string(),
        };
        if rows.last().is_some_and(|prev| prev.date == date) {
            rows.pop();
        }
        rows.push(point);
    }

    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err(fail("no rows after normalization".to_string()));
    };
    let first_day = first.date;
    let last_day = last.date;

    let processed_null_count: usize = rows
        .iter()
        .map(|r| [r.open, r.high, r.low, r.close].iter().filter(|v| v.is_none()).count())
        .sum();

    debug!(
        "{}: {} rows {}..{} (nulls in/out {}/{})",
        ticker,
        rows.len(),
        first_day,
        last_day,
        input_null_count,
        processed_null_count
    );

    let metadata = TickerMetadataRecord {
        ticker: ticker.to_string(),
        ingestion_date,
        first_day,
        last_day,
        timespan_days: (last_day - first_day).num_days() + 1,
        row_count: rows.len() as i64,
        input_null_count: input_null_count as i64,
        processed_null_count: processed_null_count as i64,
    };

    Ok(TickerBatch { rows, metadata })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ymd;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(date: NaiveDate, hour: u32, close: f64, volume: Option<f64>) -> RawBar {
        RawBar {
            timestamp: date.and_hms_opt(hour, 30, 0).unwrap(),
            open: Some(close - 1.0),
            high: Some(close + 1.0),
            low: Some(close - 2.0),
            close: Some(close),
            volume,
        }
    }

    #[test]
    fn test_normalise_symbol() {
        assert_eq!(normalise_symbol("  aapl "), "AAPL");
        assert_eq!(normalise_symbol("brk-b"), "BRK-B");
    }

    #[test]
    fn test_sorts_and_summarises() {
        let raw = vec![
            bar(day(2021, 1, 3), 9, 502.0, Some(102.0)),
            bar(day(2021, 1, 1), 9, 500.1, Some(100.0)),
            bar(day(2021, 1, 2), 9, 501.0, Some(101.0)),
        ];
        let batch = normalize_series("AAPL", raw, day(2021, 1, 4)).unwrap();

        let dates: Vec<_> = batch.rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2021, 1, 1), day(2021, 1, 2), day(2021, 1, 3)]);
        assert!(batch.rows.iter().all(|r| r.ticker == "AAPL"));

        let md = &batch.metadata;
        assert_eq!(md.first_day, day(2021, 1, 1));
        assert_eq!(md.last_day, day(2021, 1, 3));
        assert_eq!(md.timespan_days, 3);
        assert_eq!(md.row_count, 3);
        assert_eq!(md.input_null_count, 0);
        assert_eq!(md.processed_null_count, 0);
        assert_eq!(md.ingestion_date, day(2021, 1, 4));
    }

    #[test]
    fn test_same_day_keeps_later_row() {
        let raw = vec![
            bar(day(2021, 1, 4), 9, 10.0, Some(1.0)),
            bar(day(2021, 1, 4), 16, 11.0, Some(2.0)),
            bar(day(2021, 1, 5), 9, 12.0, Some(3.0)),
        ];
        let batch = normalize_series("MSFT", raw, day(2021, 1, 6)).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].close, Some(11.0));
        assert!(batch.rows.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_null_counts_and_placeholders() {
        let mut gap = bar(day(2021, 1, 2), 9, 0.0, Some(5.0));
        gap.open = None;
        let placeholder = RawBar {
            timestamp: day(2021, 1, 3).and_hms_opt(9, 30, 0).unwrap(),
            ..Default::default()
        };
        let raw = vec![bar(day(2021, 1, 1), 9, 1.0, Some(5.0)), gap, placeholder];

        let batch = normalize_series("X", raw, day(2021, 1, 4)).unwrap();
        assert_eq!(batch.metadata.input_null_count, 6);
        assert_eq!(batch.metadata.processed_null_count, 1);
        assert_eq!(batch.metadata.row_count, 2);
        assert_eq!(batch.metadata.timespan_days, 2);
    }

    #[test]
    fn test_volume_is_truncated_integer() {
        let raw = vec![bar(day(2021, 1, 1), 9, 1.0, Some(1234.9))];
        let batch = normalize_series("X", raw, day(2021, 1, 2)).unwrap();
        assert_eq!(batch.rows[0].volume, 1234);
        assert!(batch.rows[0].volume >= 0);
    }

    #[test]
    fn test_bad_volume_fails() {
        for v in [None, Some(-1.0), Some(f64::NAN)] {
            let raw = vec![bar(day(2021, 1, 1), 9, 1.0, v)];
            let err = normalize_series("X", raw, day(2021, 1, 2)).unwrap_err();
            assert!(matches!(err, IngestError::NormalizationFailure { ref ticker, .. } if ticker == "X"));
        }
    }

    #[test]
    fn test_all_placeholders_fails() {
        let raw = vec![RawBar::default(), RawBar::default()];
        assert!(normalize_series("X", raw, day(2021, 1, 2)).is_err());
    }

    #[test]
    fn test_dates_render_as_ymd() {
        let raw = vec![bar(day(2021, 3, 9), 23, 1.0, Some(1.0))];
        let batch = normalize_series("X", raw, day(2021, 3, 10)).unwrap();
        let s = batch.rows[0].date.format(ymd::FORMAT).to_string();
        assert_eq!(s, "2021-03-09");
        assert_eq!(s.len(), 10);
    }
}
