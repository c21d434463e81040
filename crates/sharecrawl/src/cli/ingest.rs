//! Ingest command - upload pending manifest files to the backend

use crate::cli::output::{format_duration_ms, print_summary};
use anyhow::{Context, Result};
use clap::Args;
use sharecrawl::config::IngestConfig;
use sharecrawl::ingest::{IngestSummary, Ingestor, IngestorClient};
use sharecrawl::{CancellationToken, ManifestDb};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Manifest database path
    #[arg(long = "db", env = "SHARECRAWL_DB")]
    pub db_path: Option<PathBuf>,

    /// Backend host
    #[arg(long, env = "SHARECRAWL_HOST")]
    pub host: Option<String>,

    /// Backend port
    #[arg(long, env = "SHARECRAWL_PORT")]
    pub port: Option<u16>,

    /// http or https
    #[arg(long, env = "SHARECRAWL_SCHEME")]
    pub scheme: Option<String>,

    /// Target collection
    #[arg(long = "collection", env = "SHARECRAWL_COLLECTION")]
    pub collection_name: Option<String>,

    /// Files per upload request
    #[arg(long, env = "SHARECRAWL_INGEST_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Write a checkpoint every N batches
    #[arg(long, env = "SHARECRAWL_CHECKPOINT_INTERVAL")]
    pub checkpoint_interval: Option<u64>,

    #[arg(long = "checkpoint", env = "SHARECRAWL_CHECKPOINT")]
    pub checkpoint_path: Option<PathBuf>,

    /// Restore counters from the checkpoint file
    #[arg(long)]
    pub resume: bool,

    /// Create the collection before uploading
    #[arg(long)]
    pub create_collection: bool,

    /// Stop after the first batch with a failed file
    #[arg(long)]
    pub stop_on_error: bool,

    /// Upload retries per batch
    #[arg(long, env = "SHARECRAWL_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Pause between batches in milliseconds
    #[arg(long, env = "SHARECRAWL_BATCH_DELAY_MS")]
    pub batch_delay_ms: Option<u64>,

    /// Ask the backend to finish each batch before responding
    #[arg(long)]
    pub blocking: bool,

    /// Mark files already in the collection as completed
    #[arg(long)]
    pub skip_existing: bool,

    /// Re-queue files that failed in an earlier run
    #[arg(long)]
    pub retry_failed: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestArgs {
    /// Overlay flags and environment onto the file configuration.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(scheme) = &self.scheme {
            config.scheme = scheme.clone();
        }
        if let Some(collection) = &self.collection_name {
            config.collection_name = collection.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint_interval = interval;
        }
        if let Some(path) = &self.checkpoint_path {
            config.checkpoint_path = path.clone();
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.batch_delay_ms {
            config.batch_delay_ms = delay;
        }
        config.resume |= self.resume;
        config.create_collection |= self.create_collection;
        config.blocking |= self.blocking;
        config.skip_existing |= self.skip_existing;
        config.retry_failed |= self.retry_failed;
        if self.stop_on_error {
            config.continue_on_error = false;
        }
    }
}

pub async fn run(args: IngestArgs, mut config: IngestConfig, cancel: CancellationToken) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let db = ManifestDb::open_existing(&config.db_path)
        .await
        .with_context(|| format!("Failed to open manifest {}", config.db_path.display()))?;

    let client = IngestorClient::new(config.upload_options())
        .context("Failed to build backend client")?;
    info!(
        backend = client.base_url(),
        collection = %config.collection_name,
        "Starting ingestion"
    );

    let ingestor = Ingestor::new(db.clone(), client, config.ingest_options());
    let summary = ingestor.run(&cancel).await;
    db.close().await;
    let summary = summary?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_report(&summary);
    }

    Ok(())
}

fn print_report(summary: &IngestSummary) {
    let title = if summary.cancelled {
        "Ingestion cancelled"
    } else if summary.halted {
        "Ingestion halted after a failed batch"
    } else {
        "Ingestion complete"
    };
    print_summary(
        title,
        vec![
            ("Batches", summary.batches.to_string()),
            ("Completed", summary.completed.to_string()),
            ("Failed", summary.failed.to_string()),
            ("Already in collection", summary.skipped.to_string()),
            ("Missing on disk", summary.missing.to_string()),
            ("Recovered in-flight", summary.recovered_in_flight.to_string()),
            ("Batch cursor", summary.totals.batch_cursor.to_string()),
            ("Total processed", summary.totals.processed.to_string()),
            ("Total completed", summary.totals.completed.to_string()),
            ("Total failed", summary.totals.failed.to_string()),
            ("Duration", format_duration_ms(summary.duration_ms)),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: IngestArgs,
    }

    #[test]
    fn test_stop_on_error_disables_continue() {
        let harness = Harness::parse_from([
            "ingest",
            "--collection",
            "hr",
            "--stop-on-error",
            "--resume",
        ]);

        let mut config = IngestConfig::default();
        harness.args.apply(&mut config);

        assert_eq!(config.collection_name, "hr");
        assert!(!config.continue_on_error);
        assert!(config.resume);
        assert_eq!(config.port, 8082);
    }
}
