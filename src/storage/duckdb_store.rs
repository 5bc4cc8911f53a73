use super::{Table, TableStore};
use crate::error::StoreError;
use crate::models::{PricePoint, TickerMetadataRecord};
use anyhow::{Context, Result};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const PRICE_TABLE: &str = "price_history";
const METADATA_TABLE: &str = "ingestion_metadata";

const PRICE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS price_history (
    date    DATE    NOT NULL,
    open    DOUBLE,
    high    DOUBLE,
    low     DOUBLE,
    close   DOUBLE,
    volume  BIGINT  NOT NULL,
    ticker  VARCHAR NOT NULL
);
"#;

const METADATA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ingestion_metadata (
    ticker                VARCHAR NOT NULL,
    ingestion_date        DATE    NOT NULL,
    first_day             DATE    NOT NULL,
    last_day              DATE    NOT NULL,
    timespan_days         BIGINT  NOT NULL,
    row_count             BIGINT  NOT NULL,
    input_null_count      BIGINT  NOT NULL,
    processed_null_count  BIGINT  NOT NULL
);
"#;

// ── Store ─────────────────────────────────────────────────────────────────────

/// DuckDB-backed store. Tables are created on first save and rewritten in
/// full on every save; row order is kept through an insertion rowid.
pub struct DuckDbTableStore {
    conn: Mutex<Connection>,
    label: String,
}

impl DuckDbTableStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
            label: format!("duckdb:{}", path.display()),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            label: "duckdb:memory".to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("DuckDB connection lock poisoned".into()))
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            params![name],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }
}

impl TableStore for DuckDbTableStore {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn load_data(&self) -> Result<Option<Vec<PricePoint>>, StoreError> {
        let conn = self.lock()?;
        if !Self::table_exists(&conn, PRICE_TABLE)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT date, open, high, low, close, volume, ticker FROM price_history ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(PricePoint {
                    date: r.get(0)?,
                    open: r.get(1)?,
                    high: r.get(2)?,
                    low: r.get(3)?,
                    close: r.get(4)?,
                    volume: r.get(5)?,
                    ticker: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(rows))
    }

    fn load_metadata(&self) -> Result<Option<Vec<TickerMetadataRecord>>, StoreError> {
        let conn = self.lock()?;
        if !Self::table_exists(&conn, METADATA_TABLE)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            r#"SELECT ticker, ingestion_date, first_day, last_day, timespan_days,
                      row_count, input_null_count, processed_null_count
               FROM ingestion_metadata ORDER BY rowid"#,
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(TickerMetadataRecord {
                    ticker: r.get(0)?,
                    ingestion_date: r.get(1)?,
                    first_day: r.get(2)?,
                    last_day: r.get(3)?,
                    timespan_days: r.get(4)?,
                    row_count: r.get(5)?,
                    input_null_count: r.get(6)?,
                    processed_null_count: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(rows))
    }

    fn save_data(&self, rows: &[PricePoint]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(PRICE_DDL)?;
        tx.execute("DELETE FROM price_history", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO price_history (date, open, high, low, close, volume, ticker)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.date, row.open, row.high, row.low, row.close, row.volume, row.ticker,
                ])?;
            }
        }
        tx.commit()?;
        info!("Wrote {} {} rows to {}", rows.len(), Table::Data, self.label);
        Ok(())
    }

    fn save_metadata(&self, rows: &[TickerMetadataRecord]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(METADATA_DDL)?;
        tx.execute("DELETE FROM ingestion_metadata", [])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO ingestion_metadata
                       (ticker, ingestion_date, first_day, last_day, timespan_days,
                        row_count, input_null_count, processed_null_count)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for m in rows {
                stmt.execute(params![
                    m.ticker,
                    m.ingestion_date,
                    m.first_day,
                    m.last_day,
                    m.timespan_days,
                    m.row_count,
                    m.input_null_count,
                    m.processed_null_count,
                ])?;
            }
        }
        tx.commit()?;
        info!("Wrote {} {} rows to {}", rows.len(), Table::Metadata, self.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::day;

    fn rows() -> Vec<PricePoint> {
        (1..=3)
            .map(|d| PricePoint {
                date: day(2021, 1, d),
                open: Some(200.0 + d as f64),
                high: Some(210.0),
                low: if d == 2 { None } else { Some(190.0) },
                close: Some(200.5),
                volume: 100 + d as i64,
                ticker: "MSFT".into(),
            })
            .collect()
    }

    #[test]
    fn test_absent_until_first_save() {
        let store = DuckDbTableStore::open_in_memory().unwrap();
        assert!(store.load_data().unwrap().is_none());
        assert!(store.load_metadata().unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_contents() {
        let store = DuckDbTableStore::open_in_memory().unwrap();
        store.save_data(&rows()).unwrap();
        assert_eq!(store.load_data().unwrap().unwrap(), rows());

        let shorter = rows()[..1].to_vec();
        store.save_data(&shorter).unwrap();
        assert_eq!(store.load_data().unwrap().unwrap(), shorter);
    }

    #[test]
    fn test_metadata_round_trip() {
        let store = DuckDbTableStore::open_in_memory().unwrap();
        let md = vec![TickerMetadataRecord {
            ticker: "MSFT".into(),
            ingestion_date: day(2021, 1, 4),
            first_day: day(2021, 1, 1),
            last_day: day(2021, 1, 3),
            timespan_days: 3,
            row_count: 3,
            input_null_count: 0,
            processed_null_count: 1,
        }];
        store.save_metadata(&md).unwrap();
        assert_eq!(store.load_metadata().unwrap().unwrap(), md);
        assert!(store.load_data().unwrap().is_none());
    }
}
