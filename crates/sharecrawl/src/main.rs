//! sharecrawl launcher
//!
//! - `crawl`: walk a share into the manifest
//! - `ingest`: upload pending files to the document backend
//! - `stats`, `files`: inspect the manifest
//!
//! SIGINT/SIGTERM cancel a run cooperatively; in-flight work finishes and the
//! manifest stays consistent.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sharecrawl::{CancellationToken, Config};
use sharecrawl_logging::{init_logging, LogConfig, LogFormat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, warn};

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "sharecrawl",
    version,
    about = "Crawl a file share into a manifest and ingest it into a retrieval backend"
)]
struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long, global = true, env = "SHARECRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Log line format: text or json
    #[arg(long, global = true, env = "SHARECRAWL_LOG_FORMAT", value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Log directory (defaults to ~/.sharecrawl/logs)
    #[arg(long, global = true, env = "SHARECRAWL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Walk a share and record every entry in the manifest
    Crawl(cli::crawl::CrawlArgs),

    /// Upload pending manifest files to the document backend
    Ingest(cli::ingest::IngestArgs),

    /// Show crawl and ingestion statistics
    Stats(cli::stats::StatsArgs),

    /// List manifest entries
    Files(cli::files::FilesArgs),
}

impl Commands {
    fn log_name(&self) -> &'static str {
        match self {
            Commands::Crawl(_) => "crawl",
            Commands::Ingest(_) => "ingest",
            Commands::Stats(_) | Commands::Files(_) => "sharecrawl",
        }
    }
}

fn parse_log_format(s: &str) -> std::result::Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format '{}' (expected text or json)", s))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            return ExitCode::from(1);
        }
    };

    let _log_guard = match init_logging(LogConfig {
        app_name: cli.command.log_name(),
        verbose: cli.verbose,
        format: cli.log_format.unwrap_or(config.logging.format),
        log_dir: cli.log_dir.clone().or_else(|| config.logging.dir.clone()),
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn run_command(command: Commands, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let cancel = CancellationToken::new();
    if matches!(command, Commands::Crawl(_) | Commands::Ingest(_)) {
        if let Err(err) = cancel.cancel_on_signal() {
            warn!(error = %err, "Signal handling unavailable; Ctrl+C will abort immediately");
        }
    }

    match command {
        Commands::Crawl(args) => runtime.block_on(cli::crawl::run(args, config.crawl, cancel)),
        Commands::Ingest(args) => runtime.block_on(cli::ingest::run(args, config.ingest, cancel)),
        Commands::Stats(args) => runtime.block_on(cli::stats::run(args, config.crawl.db_path)),
        Commands::Files(args) => runtime.block_on(cli::files::run(args, config.crawl.db_path)),
    }
}
