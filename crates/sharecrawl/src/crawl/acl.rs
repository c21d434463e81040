//! Access-control capture for one filesystem entry.
//!
//! `full` runs `getfacl -c` and falls back to stat-derived permissions,
//! `basic` only does the stat, `none` does no I/O at all. None of them time
//! out on their own; the walker wraps every call in its per-file timeout.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Extractor selection, fixed for a crawl run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AclMethod {
    #[default]
    Full,
    Basic,
    None,
}

impl AclMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Basic => "basic",
            Self::None => "none",
        }
    }
}

/// Which method produced a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclSource {
    Getfacl,
    Stat,
    None,
}

impl AclSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Getfacl => "getfacl",
            Self::Stat => "stat",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclCapture {
    /// `getfacl` text or the stat JSON; `None` only when nothing was captured.
    pub raw_acl: Option<String>,
    pub captured: bool,
    pub method: AclSource,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("getfacl unavailable: {0}")]
    Unavailable(String),

    #[error("{method} failed: {message}")]
    Failed {
        method: &'static str,
        message: String,
    },

    #[error("All ACL methods failed (getfacl: {primary}; stat: {fallback})")]
    AllMethodsFailed { primary: String, fallback: String },
}

/// Configured extractor.
#[derive(Debug, Clone)]
pub enum AclExtractor {
    /// `getfacl` first, stat on failure.
    Full { getfacl: PathBuf },
    Basic,
    None,
}

impl AclExtractor {
    pub fn new(method: AclMethod, getfacl: impl Into<PathBuf>) -> Self {
        match method {
            AclMethod::Full => Self::Full {
                getfacl: getfacl.into(),
            },
            AclMethod::Basic => Self::Basic,
            AclMethod::None => Self::None,
        }
    }

    pub fn method(&self) -> AclMethod {
        match self {
            Self::Full { .. } => AclMethod::Full,
            Self::Basic => AclMethod::Basic,
            Self::None => AclMethod::None,
        }
    }

    pub async fn extract(&self, path: &Path) -> Result<AclCapture, AclError> {
        match self {
            Self::Full { getfacl } => match run_getfacl(getfacl, path).await {
                Ok(capture) => Ok(capture),
                Err(primary) => {
                    debug!(path = %path.display(), error = %primary, "getfacl failed, using stat");
                    match stat_acl(path).await {
                        Ok(capture) => Ok(capture),
                        Err(AclError::PermissionDenied(msg)) => Err(AclError::PermissionDenied(msg)),
                        Err(fallback) => Err(AclError::AllMethodsFailed {
                            primary: primary.to_string(),
                            fallback: fallback.to_string(),
                        }),
                    }
                }
            },
            Self::Basic => stat_acl(path).await,
            Self::None => Ok(AclCapture {
                raw_acl: None,
                captured: false,
                method: AclSource::None,
            }),
        }
    }
}

async fn run_getfacl(program: &Path, path: &Path) -> Result<AclCapture, AclError> {
    if !cfg!(target_os = "linux") {
        return Err(AclError::Unavailable("only supported on Linux".to_string()));
    }

    // A timed-out walker drops this future, which kills the child.
    let output = Command::new(program)
        .arg("-c")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AclError::Unavailable(format!("{} not found", program.display()))
            }
            _ => AclError::Failed {
                method: AclSource::Getfacl.as_str(),
                message: e.to_string(),
            },
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("Permission denied") {
            return Err(AclError::PermissionDenied(stderr));
        }
        return Err(AclError::Failed {
            method: AclSource::Getfacl.as_str(),
            message: format!("exit code {:?}: {}", output.status.code(), stderr),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        return Err(AclError::Failed {
            method: AclSource::Getfacl.as_str(),
            message: "empty output".to_string(),
        });
    }

    Ok(AclCapture {
        raw_acl: Some(stdout),
        captured: true,
        method: AclSource::Getfacl,
    })
}

/// Permission bits and ownership as a JSON object.
async fn stat_acl(path: &Path) -> Result<AclCapture, AclError> {
    let meta = tokio::fs::symlink_metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => AclError::PermissionDenied(e.to_string()),
        _ => AclError::Failed {
            method: AclSource::Stat.as_str(),
            message: e.to_string(),
        },
    })?;

    let raw = stat_json(&meta);
    Ok(AclCapture {
        raw_acl: Some(raw.to_string()),
        captured: true,
        method: AclSource::Stat,
    })
}

#[cfg(unix)]
fn stat_json(meta: &std::fs::Metadata) -> serde_json::Value {
    use std::os::unix::fs::MetadataExt;

    json!({
        "method": AclSource::Stat.as_str(),
        "mode": format!("0o{:o}", meta.mode()),
        "uid": meta.uid(),
        "gid": meta.gid(),
        "size": meta.size(),
        "mtime": meta.mtime(),
        "atime": meta.atime(),
        "ctime": meta.ctime(),
    })
}

#[cfg(not(unix))]
fn stat_json(meta: &std::fs::Metadata) -> serde_json::Value {
    let secs = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    };

    json!({
        "method": AclSource::Stat.as_str(),
        "readonly": meta.permissions().readonly(),
        "size": meta.len(),
        "mtime": secs(meta.modified()),
        "atime": secs(meta.accessed()),
        "ctime": secs(meta.created()),
    })
}

/// Seconds since the epoch for a metadata timestamp.
pub(crate) fn unix_seconds(time: std::io::Result<std::time::SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}
