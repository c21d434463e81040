//! Run-level error types
//!
//! These are the failures that abort a crawl or ingestion run. Per-entry
//! failures (permission denied, ACL failure, vanished files, upload errors)
//! never surface here; they are recorded on the manifest row instead.

use std::io;
use thiserror::Error;

/// Fatal error for a crawl or ingestion run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Manifest error: {0}")]
    Database(#[from] sharecrawl_db::DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Backend unavailable: {0}")]
    Backend(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
