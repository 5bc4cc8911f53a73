use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Market data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Csv,
    Duckdb,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_ticker_file")]
    pub ticker_file: PathBuf,

    #[serde(default = "default_data_file")]
    pub data_file: String,

    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Upper bound on concurrent fetches, independent of universe size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    #[serde(default = "default_true")]
    pub skip_up_to_date: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Drop rows only when every column matches.
    #[default]
    ExactRow,
    /// Keep the latest row per (ticker, date) / per ticker.
    LatestByKey,
}

/// Merge configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub dedup: DedupMode,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://query2.finance.yahoo.com/v8/finance/chart".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) stock-ingest/0.1".to_string()
}
fn default_backend() -> StorageBackend {
    StorageBackend::Csv
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_ticker_file() -> PathBuf {
    PathBuf::from("data/tickers.csv")
}
fn default_data_file() -> String {
    "stock_history.csv".to_string()
}
fn default_metadata_file() -> String {
    "metadata.csv".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/stock_data.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_max_concurrency() -> usize {
    8
}
fn default_stale_after_days() -> i64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            ticker_file: default_ticker_file(),
            data_file: default_data_file(),
            metadata_file: default_metadata_file(),
            db_path: default_db_path(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            stale_after_days: default_stale_after_days(),
            skip_up_to_date: true,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("STOCK").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.pipeline.max_concurrency > 0,
            "pipeline.max_concurrency must be at least 1"
        );
        anyhow::ensure!(
            self.pipeline.stale_after_days >= 0,
            "pipeline.stale_after_days must not be negative"
        );
        Ok(())
    }
}
