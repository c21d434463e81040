//! Stats command - manifest aggregates

use crate::cli::output::{color_for_status, print_summary, print_table_colored};
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use sharecrawl::ManifestDb;
use sharecrawl_db::{CrawlStats, IngestionStats, StatusCount};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Manifest database path
    #[arg(long = "db", env = "SHARECRAWL_DB")]
    pub db_path: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    crawl: CrawlStats,
    ingestion: IngestionStats,
    breakdown: Vec<StatusCount>,
}

pub async fn run(args: StatsArgs, default_db: PathBuf) -> Result<()> {
    let db_path = args.db_path.unwrap_or(default_db);
    let db = ManifestDb::open_existing(&db_path)
        .await
        .with_context(|| format!("Failed to open manifest {}", db_path.display()))?;

    let output = StatsOutput {
        crawl: db.crawl_stats().await?,
        ingestion: db.ingestion_stats().await?,
        breakdown: db.status_breakdown().await?,
    };
    db.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let crawl = &output.crawl;
    print_summary(
        "Crawl",
        vec![
            ("Total", crawl.total.to_string()),
            ("Directories", crawl.directories.to_string()),
            ("Files", crawl.files.to_string()),
            ("Discovered", crawl.discovered.to_string()),
            ("Permission denied", crawl.permission_denied.to_string()),
            ("ACL failed", crawl.acl_failed.to_string()),
            ("Errors", crawl.errors.to_string()),
            ("Skipped", crawl.skipped.to_string()),
            ("ACL captured", crawl.acl_captured.to_string()),
        ],
    );

    let ingestion = &output.ingestion;
    print_summary(
        "Ingestion",
        vec![
            ("Total", ingestion.total.to_string()),
            ("Pending", ingestion.pending.to_string()),
            ("Ingesting", ingestion.ingesting.to_string()),
            ("Completed", ingestion.completed.to_string()),
            ("Failed", ingestion.failed.to_string()),
        ],
    );

    if !output.breakdown.is_empty() {
        println!("By status");
        let rows = output
            .breakdown
            .iter()
            .map(|row| {
                vec![
                    (row.status.to_string(), Some(color_for_status(row.status))),
                    (row.count.to_string(), None),
                    (format!("{:.2}%", row.percentage), None),
                ]
            })
            .collect();
        print_table_colored(&["Status", "Count", "Share"], rows);
    }

    Ok(())
}
