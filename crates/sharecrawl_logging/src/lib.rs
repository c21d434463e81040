//! Shared logging setup for the sharecrawl binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const DEFAULT_LOG_FILTER: &str = "sharecrawl=info,sharecrawl_db=info";
const VERBOSE_LOG_FILTER: &str = "sharecrawl=debug,sharecrawl_db=debug";

/// Line format for both the console and the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "console" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration for one process.
pub struct LogConfig<'a> {
    /// Prefix of the daily log file, e.g. `crawl` gives `crawl.log.2024-01-01`.
    pub app_name: &'a str,
    pub verbose: bool,
    pub format: LogFormat,
    /// Overrides `<home>/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Keeps the background file writer alive; drop it last in `main`.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize tracing with a daily rolling log file and stderr output.
///
/// `RUST_LOG` wins over the built-in filters. A log directory that cannot be
/// created degrades to stderr only.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir()?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    match ensure_dir(&log_dir) {
        Ok(()) => {
            let appender =
                tracing_appender::rolling::daily(&log_dir, format!("{}.log", config.app_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let filter = build_filter(config.verbose);
            layers.push(match config.format {
                LogFormat::Text => layer.with_filter(filter).boxed(),
                LogFormat::Json => layer.json().with_filter(filter).boxed(),
            });
        }
        Err(err) => {
            eprintln!("Warning: file logging disabled: {:#}", err);
        }
    }

    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let filter = build_filter(config.verbose);
    layers.push(match config.format {
        LogFormat::Text => console.with_filter(filter).boxed(),
        LogFormat::Json => console.json().with_filter(filter).boxed(),
    });

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: file_guard })
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}

/// Get the sharecrawl home directory: `$SHARECRAWL_HOME` or `~/.sharecrawl`
pub fn sharecrawl_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("SHARECRAWL_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".sharecrawl"))
        .context("Could not determine home directory")
}

/// Get the logs directory: `<home>/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(sharecrawl_home()?.join("logs"))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("console"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("logs");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    // The only test in this crate that installs the global subscriber.
    #[test]
    fn test_init_logging_json_writes_log_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let log_dir = temp.path().join("logs");
        let guard = init_logging(LogConfig {
            app_name: "crawl",
            verbose: true,
            format: LogFormat::Json,
            log_dir: Some(log_dir.clone()),
        })
        .unwrap();

        tracing::info!(target: "sharecrawl", files = 3, "Crawl complete");
        drop(guard);

        let contents: String = fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(contents.contains("\"message\":\"Crawl complete\""), "{}", contents);
        assert!(contents.contains("\"files\":3"), "{}", contents);
    }
}
