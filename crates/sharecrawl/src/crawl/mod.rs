//! Crawl phase: share tree to manifest rows.

mod acl;
mod walker;

pub use acl::{AclCapture, AclError, AclExtractor, AclMethod, AclSource};
pub use walker::{CrawlProgress, CrawlReport, WalkConfig, Walker, SYMLINK_SKIPPED, UNSUPPORTED_ENTRY};
