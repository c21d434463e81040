//! Command-line interface for sharecrawl
//!
//! Each subcommand owns its clap args and a `run` function. Flags and
//! `SHARECRAWL_*` environment variables override values from the config file.

pub mod crawl;
pub mod files;
pub mod ingest;
pub mod output;
pub mod stats;
