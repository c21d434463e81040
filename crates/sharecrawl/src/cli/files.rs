//! Files command - paginated manifest listing

use crate::cli::output::{color_for_ingestion, color_for_status, format_size, print_table_colored};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use sharecrawl::ManifestDb;
use sharecrawl_db::{FileQuery, FileStatus, IngestionStatus};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct FilesArgs {
    /// Manifest database path
    #[arg(long = "db", env = "SHARECRAWL_DB")]
    pub db_path: Option<PathBuf>,

    /// Crawl status filter (e.g. discovered, acl_failed)
    #[arg(long)]
    pub status: Option<String>,

    /// Ingestion status filter (pending, ingesting, completed, failed)
    #[arg(long)]
    pub ingestion_status: Option<String>,

    /// Substring of the file name or path
    #[arg(short = 's', long)]
    pub search: Option<String>,

    #[arg(short = 'n', long, default_value = "50")]
    pub limit: u32,

    #[arg(long, default_value = "0")]
    pub offset: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl FilesArgs {
    fn query(&self) -> Result<FileQuery> {
        let status = self
            .status
            .as_deref()
            .map(|s| FileStatus::parse(s).ok_or_else(|| anyhow!("Unknown status '{}'", s)))
            .transpose()?;
        let ingestion_status = self
            .ingestion_status
            .as_deref()
            .map(|s| {
                IngestionStatus::parse(s).ok_or_else(|| anyhow!("Unknown ingestion status '{}'", s))
            })
            .transpose()?;

        Ok(FileQuery {
            status,
            ingestion_status,
            search: self.search.clone(),
            limit: Some(self.limit),
            offset: Some(self.offset),
        })
    }
}

pub async fn run(args: FilesArgs, default_db: PathBuf) -> Result<()> {
    let query = args.query()?;
    let db_path = args.db_path.clone().unwrap_or(default_db);
    let db = ManifestDb::open_existing(&db_path)
        .await
        .with_context(|| format!("Failed to open manifest {}", db_path.display()))?;

    let page = db.query(&query).await?;
    db.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.records.is_empty() {
        println!("No matching files ({} total).", page.total);
        return Ok(());
    }

    let rows = page
        .records
        .iter()
        .map(|record| {
            let size = record
                .size
                .map(|s| format_size(s.max(0) as u64))
                .unwrap_or_else(|| "-".to_string());
            let kind = if record.is_directory { "dir" } else { "file" };
            vec![
                (record.file_path.clone(), None),
                (kind.to_string(), None),
                (size, None),
                (record.status.to_string(), Some(color_for_status(record.status))),
                (
                    record.ingestion_status.to_string(),
                    Some(color_for_ingestion(record.ingestion_status)),
                ),
                (record.error.clone().or_else(|| record.ingestion_error.clone()).unwrap_or_default(), None),
                (record.last_seen.format("%Y-%m-%d %H:%M").to_string(), None),
            ]
        })
        .collect();
    print_table_colored(
        &["Path", "Kind", "Size", "Status", "Ingestion", "Error", "Last seen"],
        rows,
    );

    let shown_to = args.offset as u64 + page.records.len() as u64;
    println!("Showing {}-{} of {}", args.offset as u64 + 1, shown_to, page.total);

    Ok(())
}
