//! Manifest row types and query projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every new row.
pub const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// Status enums
// ============================================================================

/// Crawl-side status of a manifest entry.
///
/// Anything other than `Pending` is terminal for a crawl pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Discovered,
    PermissionDenied,
    AclFailed,
    Error,
    Skipped,
}

impl FileStatus {
    pub const ALL: &'static [FileStatus] = &[
        FileStatus::Pending,
        FileStatus::Discovered,
        FileStatus::PermissionDenied,
        FileStatus::AclFailed,
        FileStatus::Error,
        FileStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Discovered => "discovered",
            Self::PermissionDenied => "permission_denied",
            Self::AclFailed => "acl_failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "discovered" => Some(Self::Discovered),
            "permission_denied" => Some(Self::PermissionDenied),
            "acl_failed" => Some(Self::AclFailed),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ingestion-side status, only meaningful for discovered files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Ingesting,
    Completed,
    Failed,
}

impl IngestionStatus {
    pub const ALL: &'static [IngestionStatus] = &[
        IngestionStatus::Pending,
        IngestionStatus::Ingesting,
        IngestionStatus::Completed,
        IngestionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ingesting => "ingesting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ingesting" => Some(Self::Ingesting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rows
// ============================================================================

/// An entry produced by the walker, ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEntry {
    pub file_path: String,
    pub file_name: String,
    pub parent_dir: String,
    pub size: Option<i64>,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: Option<i64>,
    pub raw_acl: Option<String>,
    pub acl_captured: bool,
    pub status: FileStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub is_directory: bool,
}

impl DiscoveredEntry {
    /// A bare entry for `path` with the given status and nothing captured yet.
    pub fn new(
        file_path: impl Into<String>,
        file_name: impl Into<String>,
        parent_dir: impl Into<String>,
        is_directory: bool,
        status: FileStatus,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            file_name: file_name.into(),
            parent_dir: parent_dir.into(),
            size: None,
            mtime: None,
            raw_acl: None,
            acl_captured: false,
            status,
            error: None,
            retry_count: 0,
            is_directory,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A full manifest row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub parent_dir: String,
    pub size: Option<i64>,
    pub mtime: Option<i64>,
    pub raw_acl: Option<String>,
    pub acl_captured: bool,
    pub status: FileStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub is_directory: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub schema_version: i64,
    pub ingestion_status: IngestionStatus,
    pub ingestion_attempts: u32,
    pub ingestion_error: Option<String>,
    pub ingested_at: Option<DateTime<Utc>>,
}

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    pub inserted: u64,
    /// Rows whose path already existed (only `last_seen` was refreshed).
    pub skipped: u64,
}

/// One ingestion status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionUpdate {
    pub file_path: String,
    pub status: IngestionStatus,
    pub error: Option<String>,
    /// Upload attempts consumed by this transition, added to the stored counter.
    pub attempts: u32,
}

impl IngestionUpdate {
    pub fn new(file_path: impl Into<String>, status: IngestionStatus) -> Self {
        Self {
            file_path: file_path.into(),
            status,
            error: None,
            attempts: 0,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Filters for the file listing.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub status: Option<FileStatus>,
    pub ingestion_status: Option<IngestionStatus>,
    /// Substring match against `file_name` or `file_path`.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// One page of the file listing.
#[derive(Debug, Clone, Serialize)]
pub struct FilePage {
    /// Rows matching the filters, ignoring pagination.
    pub total: u64,
    pub records: Vec<ManifestRecord>,
}

/// Crawl aggregate over the whole manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total: u64,
    pub directories: u64,
    pub files: u64,
    pub discovered: u64,
    pub permission_denied: u64,
    pub acl_failed: u64,
    pub errors: u64,
    pub skipped: u64,
    pub acl_captured: u64,
}

/// Ingestion aggregate over discovered files (directories excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    pub ingesting: u64,
}

/// Row count for one crawl status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: FileStatus,
    pub count: u64,
    pub percentage: f64,
}
