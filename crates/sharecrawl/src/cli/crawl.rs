//! Crawl command - walk a share into the manifest

use crate::cli::output::{format_duration_ms, print_summary};
use anyhow::{Context, Result};
use clap::Args;
use sharecrawl::config::CrawlConfig;
use sharecrawl::crawl::{AclExtractor, AclMethod, CrawlReport, Walker};
use sharecrawl::{CancellationToken, ManifestDb};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Share root to walk
    #[arg(env = "SHARECRAWL_ROOT")]
    pub root: Option<PathBuf>,

    /// Manifest database path
    #[arg(long = "db", env = "SHARECRAWL_DB")]
    pub db_path: Option<PathBuf>,

    /// Parallel walker workers
    #[arg(short = 'w', long, env = "SHARECRAWL_WORKERS")]
    pub workers: Option<usize>,

    /// Records per manifest transaction
    #[arg(long, env = "SHARECRAWL_CRAWL_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Per-file stat and ACL timeout in minutes
    #[arg(long, env = "SHARECRAWL_FILE_TIMEOUT_MINUTES")]
    pub file_timeout_minutes: Option<u64>,

    /// ACL capture method
    #[arg(long, value_enum, env = "SHARECRAWL_ACL_METHOD")]
    pub acl_method: Option<AclMethod>,

    /// Log progress every N persisted records (0 disables)
    #[arg(long, env = "SHARECRAWL_PROGRESS_INTERVAL")]
    pub progress_interval: Option<u64>,

    /// Retries for a directory listing that fails transiently
    #[arg(long, env = "SHARECRAWL_MAX_DIR_RETRIES")]
    pub max_dir_retries: Option<u32>,

    /// getfacl program used by the full ACL method
    #[arg(long, env = "SHARECRAWL_GETFACL")]
    pub getfacl_path: Option<PathBuf>,

    /// Print the crawl report as JSON
    #[arg(long)]
    pub json: bool,
}

impl CrawlArgs {
    /// Overlay flags and environment onto the file configuration.
    pub fn apply(&self, config: &mut CrawlConfig) {
        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(minutes) = self.file_timeout_minutes {
            config.file_timeout_minutes = minutes;
        }
        if let Some(method) = self.acl_method {
            config.acl_method = method;
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
        if let Some(retries) = self.max_dir_retries {
            config.max_dir_retries = retries;
        }
        if let Some(getfacl) = &self.getfacl_path {
            config.getfacl_path = getfacl.clone();
        }
    }
}

pub async fn run(args: CrawlArgs, mut config: CrawlConfig, cancel: CancellationToken) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let root = config
        .root
        .clone()
        .context("No share root given: pass ROOT or set crawl.root in the config file")?;

    let db = ManifestDb::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open manifest {}", config.db_path.display()))?;

    info!(db = %config.db_path.display(), "Manifest opened");

    let extractor = AclExtractor::new(config.acl_method, config.getfacl_path.clone());
    let walker = Walker::new(db.clone(), extractor).with_config(config.walk_config());
    let report = walker.crawl(&root, &cancel).await;
    db.close().await;
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &CrawlReport) {
    let title = if report.cancelled {
        "Crawl cancelled"
    } else {
        "Crawl complete"
    };
    print_summary(
        title,
        vec![
            ("Entries", report.entries.to_string()),
            ("Directories", report.directories.to_string()),
            ("Files", report.files.to_string()),
            ("Discovered", report.discovered.to_string()),
            ("Permission denied", report.permission_denied.to_string()),
            ("ACL failed", report.acl_failed.to_string()),
            ("Errors", report.errors.to_string()),
            ("Skipped", report.skipped.to_string()),
            ("ACL captured", report.acl_captured.to_string()),
            ("Unsupported (dropped)", report.unsupported.to_string()),
            ("New rows", report.inserted.to_string()),
            ("Already known", report.already_known.to_string()),
            ("Duration", format_duration_ms(report.duration_ms)),
        ],
    );
}
