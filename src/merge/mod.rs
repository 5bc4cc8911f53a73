//! Merge engine: reconciles freshly fetched rows with the stored snapshot.
//!
//! Default mode concatenates existing + new and drops full-row duplicates,
//! keeping first occurrences in their original order. It does not upsert:
//! two metadata rows for one ticker that differ in any field both survive.

use crate::config::DedupMode;
use crate::models::{PricePoint, TickerMetadataRecord};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::debug;

/// A pair of tables as stored: price rows and per-ticker metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub data: Vec<PricePoint>,
    pub metadata: Vec<TickerMetadataRecord>,
}

/// Row identities used for de-duplication.
pub trait DedupRow {
    type Exact: Hash + Eq;
    type Key: Hash + Eq;

    /// Every column; floats compare by bit pattern.
    fn exact(&self) -> Self::Exact;
    /// Business key for latest-wins de-duplication.
    fn key(&self) -> Self::Key;
}

fn float_bits(v: Option<f64>) -> Option<u64> {
    v.map(f64::to_bits)
}

impl DedupRow for PricePoint {
    type Exact = (String, NaiveDate, [Option<u64>; 4], i64);
    type Key = (String, NaiveDate);

    fn exact(&self) -> Self::Exact {
        (
            self.ticker.clone(),
            self.date,
            [
                float_bits(self.open),
                float_bits(self.high),
                float_bits(self.low),
                float_bits(self.close),
            ],
            self.volume,
        )
    }

    fn key(&self) -> Self::Key {
        (self.ticker.clone(), self.date)
    }
}

impl DedupRow for TickerMetadataRecord {
    type Exact = TickerMetadataRecord;
    type Key = String;

    fn exact(&self) -> Self::Exact {
        self.clone()
    }

    fn key(&self) -> Self::Key {
        self.ticker.clone()
    }
}

/// Drop rows identical in every column to an earlier row.
pub fn drop_exact_duplicates<T: DedupRow>(rows: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter().filter(|r| seen.insert(r.exact())).collect()
}

/// Keep one row per key: the value of the last occurrence, at the position
/// of the first.
pub fn keep_latest_by_key<T: DedupRow>(rows: Vec<T>) -> Vec<T> {
    let mut slot: HashMap<T::Key, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row.key();
        if let Some(&i) = slot.get(&key) {
            out[i] = row;
        } else {
            slot.insert(key, out.len());
            out.push(row);
        }
    }
    out
}

fn dedup<T: DedupRow>(rows: Vec<T>, mode: DedupMode) -> Vec<T> {
    match mode {
        DedupMode::ExactRow => drop_exact_duplicates(rows),
        DedupMode::LatestByKey => keep_latest_by_key(rows),
    }
}

fn merge_table<T: DedupRow>(existing: Option<Vec<T>>, new: Vec<T>, mode: DedupMode) -> Vec<T> {
    match existing {
        None => new,
        Some(mut rows) => {
            rows.extend(new);
            dedup(rows, mode)
        }
    }
}

/// Merge `new` into the stored tables. Each table merges independently; an
/// absent table is replaced by its new counterpart verbatim.
pub fn merge(
    existing_data: Option<Vec<PricePoint>>,
    existing_metadata: Option<Vec<TickerMetadataRecord>>,
    new: Snapshot,
    mode: DedupMode,
) -> Snapshot {
    let before = (
        existing_data.as_ref().map_or(0, Vec::len) + new.data.len(),
        existing_metadata.as_ref().map_or(0, Vec::len) + new.metadata.len(),
    );

    let merged = Snapshot {
        data: merge_table(existing_data, new.data, mode),
        metadata: merge_table(existing_metadata, new.metadata, mode),
    };

    debug!(
        "Merge ({:?}): data {} → {}, metadata {} → {}",
        mode,
        before.0,
        merged.data.len(),
        before.1,
        merged.metadata.len()
    );
    merged
}

// ── Tests ─────────────────────────────────────────────────────────────────────
