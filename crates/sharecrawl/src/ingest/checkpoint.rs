//! Ingestion progress snapshots.
//!
//! A checkpoint only carries the batch cursor and running counters. Which
//! files remain is always re-derived from the manifest, so a stale, missing
//! or unreadable checkpoint never changes what gets uploaded.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Number of the last batch that finished.
    pub batch_cursor: u64,
    pub total_processed: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub timestamp: DateTime<Utc>,
}

/// Reads and atomically writes the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last checkpoint. A missing or corrupt file reads as `None`.
    pub fn load(&self) -> Result<Option<CheckpointState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable checkpoint"
                );
                Ok(None)
            }
        }
    }

    /// Write `state` via a temp file in the same directory and rename it into place.
    pub fn save(&self, state: &CheckpointState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Checkpoint(format!("{}: {}", self.path.display(), e)))?;

        debug!(
            path = %self.path.display(),
            batch_cursor = state.batch_cursor,
            "Checkpoint saved"
        );
        Ok(())
    }
}
