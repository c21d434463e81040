//! Manifest store for the sharecrawl pipeline
//!
//! The manifest is the only state shared between the crawl phase and the
//! ingestion phase. Both phases (and any read-only dashboard) open the same
//! SQLite file; WAL mode lets readers run while a crawl is writing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sharecrawl_db::{ManifestDb, Result};
//!
//! let db = ManifestDb::open("./manifest.db").await?;
//! let summary = db.bulk_insert_ignoring_duplicates(&entries).await?;
//! let candidates = db.query_candidates(100, 0).await?;
//! let stats = db.crawl_stats().await?;
//! ```

mod error;
mod manifest;
mod schema;
mod types;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Handle to the manifest database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct ManifestDb {
    pool: SqlitePool,
}

impl ManifestDb {
    /// Open or create a manifest at the given path.
    ///
    /// Creates the table and indexes if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let db = Self::connect(&url).await?;
        db.ensure_schema().await?;

        info!(path = %path.display(), "Manifest opened");

        Ok(db)
    }

    /// Open an existing manifest (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Manifest not found: {}",
                path.display()
            )));
        }

        let url = format!("sqlite:{}?mode=rw", path.display());
        let db = Self::connect(&url).await?;
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Open a private in-memory manifest. Used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        // A single connection, otherwise every pooled connection sees its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl ManifestDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
