//! sharecrawl - manifest-driven crawl and ingest for network file shares
//!
//! Two independent phases share one SQLite manifest:
//!
//! - **Crawl**: [`crawl::Walker`] walks the share with a worker pool, captures
//!   ACLs, and records every reachable entry exactly once.
//! - **Ingest**: [`ingest::Ingestor`] uploads pending files in batches to the
//!   document backend, records per-file outcomes, and checkpoints progress.
//!
//! Either phase can be interrupted and re-run; the manifest is the source of
//! truth for what remains.

pub mod cancel;
pub mod config;
pub mod crawl;
pub mod error;
pub mod file_types;
pub mod ingest;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{Error, Result};
pub use sharecrawl_db::ManifestDb;
