//! Configuration for crawl and ingestion runs
//!
//! Values come from, lowest precedence first: built-in defaults, a TOML file,
//! then environment variables and command-line flags (applied by the CLI).

use crate::crawl::{AclMethod, WalkConfig};
use crate::error::{Error, Result};
use crate::ingest::{BackoffPolicy, IngestOptions, UploadOptions};
use serde::{Deserialize, Serialize};
use sharecrawl_logging::LogFormat;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Defaults to `<home>/logs`
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// ============================================================================
// Crawl
// ============================================================================

/// Crawl phase options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Share root to walk
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Path to the manifest database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Parallel walker workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Records per manifest insert transaction
    #[serde(default = "default_crawl_batch_size")]
    pub batch_size: usize,

    /// Per-file stat/ACL timeout in minutes
    #[serde(default = "default_file_timeout_minutes")]
    pub file_timeout_minutes: u64,

    #[serde(default)]
    pub acl_method: AclMethod,

    /// Log progress every N persisted records
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Retries for a directory listing that fails with a non-permission error
    #[serde(default = "default_max_dir_retries")]
    pub max_dir_retries: u32,

    #[serde(default = "default_dir_retry_base_delay_ms")]
    pub dir_retry_base_delay_ms: u64,

    /// Program used by the full ACL extractor
    #[serde(default = "default_getfacl_path")]
    pub getfacl_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./manifest.db")
}

fn default_workers() -> usize {
    8
}

fn default_crawl_batch_size() -> usize {
    500
}

fn default_file_timeout_minutes() -> u64 {
    5
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_max_dir_retries() -> u32 {
    3
}

fn default_dir_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_getfacl_path() -> PathBuf {
    PathBuf::from("getfacl")
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            root: None,
            db_path: default_db_path(),
            workers: default_workers(),
            batch_size: default_crawl_batch_size(),
            file_timeout_minutes: default_file_timeout_minutes(),
            acl_method: AclMethod::default(),
            progress_interval: default_progress_interval(),
            max_dir_retries: default_max_dir_retries(),
            dir_retry_base_delay_ms: default_dir_retry_base_delay_ms(),
            getfacl_path: default_getfacl_path(),
        }
    }
}

impl CrawlConfig {
    /// Reject values that would make the walk meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("crawl batch_size must be at least 1"));
        }
        if self.file_timeout_minutes == 0 {
            return Err(Error::config("file_timeout_minutes must be at least 1"));
        }
        Ok(())
    }

    pub fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            workers: self.workers,
            batch_size: self.batch_size,
            file_timeout: Duration::from_secs(self.file_timeout_minutes * 60),
            progress_interval: self.progress_interval,
            max_dir_retries: self.max_dir_retries,
            dir_retry: BackoffPolicy::new(Duration::from_millis(self.dir_retry_base_delay_ms)),
        }
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// Ingestion phase options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Path to the manifest database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Files per upload request
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,

    /// Write a checkpoint every N batches
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Restore counters from the checkpoint file
    #[serde(default)]
    pub resume: bool,

    /// Create the collection before uploading
    #[serde(default)]
    pub create_collection: bool,

    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pause between batches
    #[serde(default)]
    pub batch_delay_ms: u64,

    /// Ask the backend to finish ingestion before responding
    #[serde(default)]
    pub blocking: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Mark files already present in the collection as completed
    #[serde(default)]
    pub skip_existing: bool,

    /// Re-queue files that failed in an earlier run
    #[serde(default)]
    pub retry_failed: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default)]
    pub generate_summary: bool,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u32,

    #[serde(default)]
    pub http_proxy: Option<String>,

    #[serde(default)]
    pub https_proxy: Option<String>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_collection_name() -> String {
    "documents".to_string()
}

fn default_ingest_batch_size() -> usize {
    100
}

fn default_checkpoint_interval() -> u64 {
    10
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./ingestion_checkpoint.json")
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_timeout_secs() -> u64 {
    3_600
}

fn default_chunk_size() -> u32 {
    512
}

fn default_chunk_overlap() -> u32 {
    150
}

fn default_embedding_dimension() -> u32 {
    2048
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            collection_name: default_collection_name(),
            batch_size: default_ingest_batch_size(),
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_path: default_checkpoint_path(),
            resume: false,
            create_collection: false,
            continue_on_error: true,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            batch_delay_ms: 0,
            blocking: false,
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            skip_existing: false,
            retry_failed: false,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            generate_summary: false,
            embedding_dimension: default_embedding_dimension(),
            http_proxy: None,
            https_proxy: None,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("ingest batch_size must be at least 1"));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::config("checkpoint_interval must be at least 1"));
        }
        if self.collection_name.trim().is_empty() {
            return Err(Error::config("collection_name must not be empty"));
        }
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(Error::config(format!(
                "invalid backend address {}:{}",
                self.host, self.port
            )));
        }
        if !matches!(self.scheme.as_str(), "http" | "https") {
            return Err(Error::config(format!("unsupported scheme: {}", self.scheme)));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config("chunk_overlap must be smaller than chunk_size"));
        }
        Ok(())
    }

    /// e.g. `http://localhost:8082`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            base_url: self.base_url(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            collection_name: self.collection_name.clone(),
            batch_size: self.batch_size,
            checkpoint_interval: self.checkpoint_interval,
            checkpoint_path: self.checkpoint_path.clone(),
            resume: self.resume,
            create_collection: self.create_collection,
            continue_on_error: self.continue_on_error,
            max_retries: self.max_retries,
            backoff: BackoffPolicy::new(Duration::from_millis(self.retry_base_delay_ms)),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            blocking: self.blocking,
            skip_existing: self.skip_existing,
            retry_failed: self.retry_failed,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            generate_summary: self.generate_summary,
            embedding_dimension: self.embedding_dimension,
        }
    }
}
