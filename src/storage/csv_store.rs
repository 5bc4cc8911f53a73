use super::{Table, TableStore};
use crate::error::StoreError;
use crate::models::{PricePoint, TickerMetadataRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Flat CSV files in one directory, one per table.
pub struct CsvTableStore {
    dir: PathBuf,
    data_file: String,
    metadata_file: String,
}

impl CsvTableStore {
    pub fn new(dir: &Path, data_file: &str, metadata_file: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            data_file: data_file.to_string(),
            metadata_file: metadata_file.to_string(),
        }
    }

    pub fn path_for(&self, table: Table) -> PathBuf {
        match table {
            Table::Data => self.dir.join(&self.data_file),
            Table::Metadata => self.dir.join(&self.metadata_file),
        }
    }

    fn read<T: DeserializeOwned>(&self, table: Table) -> Result<Option<Vec<T>>, StoreError> {
        let path = self.path_for(table);
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No {} table at {:?}", table, path);
                return Ok(None);
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(|source| StoreError::Csv { table: table.name(), source })?;

        debug!("Loaded {} {} rows from {:?}", rows.len(), table, path);
        Ok(Some(rows))
    }

    /// Write to a sibling temp file then rename over the target.
    fn write<T: Serialize>(&self, table: Table, rows: &[T]) -> Result<(), StoreError> {
        let io_err = |path: &Path, source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(self.dir.as_path(), e))?;

        let path = self.path_for(table);
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(true)
                .from_path(&tmp)
                .map_err(|source| StoreError::Csv { table: table.name(), source })?;
            for row in rows {
                writer
                    .serialize(row)
                    .map_err(|source| StoreError::Csv { table: table.name(), source })?;
            }
            writer.flush().map_err(|e| io_err(tmp.as_path(), e))?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| io_err(path.as_path(), e))?;

        info!("Wrote {} {} rows to {:?}", rows.len(), table, path);
        Ok(())
    }
}

impl TableStore for CsvTableStore {
    fn describe(&self) -> String {
        format!("csv:{}", self.dir.display())
    }

    fn load_data(&self) -> Result<Option<Vec<PricePoint>>, StoreError> {
        self.read(Table::Data)
    }

    fn load_metadata(&self) -> Result<Option<Vec<TickerMetadataRecord>>, StoreError> {
        self.read(Table::Metadata)
    }

    fn save_data(&self, rows: &[PricePoint]) -> Result<(), StoreError> {
        self.write(Table::Data, rows)
    }

    fn save_metadata(&self, rows: &[TickerMetadataRecord]) -> Result<(), StoreError> {
        self.write(Table::Metadata, rows)
    }
}
