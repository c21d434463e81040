//! Concurrent share walker
//!
//! A fixed pool of workers pulls directory and file work items from one
//! shared queue. Directories are listed and their children enqueued; files
//! are stat'ed and ACL-extracted under the per-file timeout. Every finished
//! entry goes through a bounded channel to a single writer that flushes
//! batches into the manifest, so the workers never touch the database.
//!
//! Symlinks are recorded as skipped and never followed. Symlinked subtrees
//! are therefore not crawled.

use super::acl::{unix_seconds, AclError, AclExtractor};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::file_types;
use crate::ingest::{retry_with_backoff, BackoffPolicy, TokioSleeper};
use serde::Serialize;
use sharecrawl_db::{DiscoveredEntry, FileStatus, ManifestDb};
use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const SYMLINK_SKIPPED: &str = "Symlink skipped to prevent cycles";
pub const UNSUPPORTED_ENTRY: &str = "Unsupported entry type";

/// Walker tuning
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Parallel workers
    pub workers: usize,
    /// Entries per manifest transaction
    pub batch_size: usize,
    /// Bound on each stat and each ACL extraction
    pub file_timeout: Duration,
    /// Log progress every N persisted entries (0 disables)
    pub progress_interval: u64,
    /// Retries for a directory listing that fails with a transient error
    pub max_dir_retries: u32,
    pub dir_retry: BackoffPolicy,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 500,
            file_timeout: Duration::from_secs(300),
            progress_interval: 10_000,
            max_dir_retries: 3,
            dir_retry: BackoffPolicy::default(),
        }
    }
}

/// Progress snapshot sent after each manifest flush.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrawlProgress {
    pub persisted: u64,
    pub inserted: u64,
    pub queued: usize,
    pub elapsed_ms: u64,
}

/// Counts by outcome for one crawl pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    pub entries: u64,
    pub directories: u64,
    pub files: u64,
    pub discovered: u64,
    pub permission_denied: u64,
    pub acl_failed: u64,
    pub errors: u64,
    pub skipped: u64,
    pub acl_captured: u64,
    /// Files dropped by the extension allow-list.
    pub unsupported: u64,
    /// New manifest rows.
    pub inserted: u64,
    /// Entries whose path was already in the manifest.
    pub already_known: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl CrawlReport {
    fn count(&mut self, entry: &DiscoveredEntry) {
        self.entries += 1;
        if entry.is_directory {
            self.directories += 1;
        } else {
            self.files += 1;
        }
        if entry.acl_captured {
            self.acl_captured += 1;
        }
        match entry.status {
            FileStatus::Discovered => self.discovered += 1,
            FileStatus::PermissionDenied => self.permission_denied += 1,
            FileStatus::AclFailed => self.acl_failed += 1,
            FileStatus::Error => self.errors += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Pending => {}
        }
    }
}

#[derive(Debug)]
enum WorkItem {
    Directory { path: PathBuf, is_root: bool },
    File(PathBuf),
}

struct Shared {
    extractor: AclExtractor,
    config: WalkConfig,
    cancel: CancellationToken,
    queue: async_channel::Sender<WorkItem>,
    /// Items enqueued but not yet finished. The queue closes when it reaches zero.
    pending: AtomicUsize,
    unsupported: AtomicU64,
}

impl Shared {
    fn enqueue(&self, item: WorkItem) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.queue.try_send(item).is_err() {
            // Closed after a writer failure; nothing will consume it.
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn finish_item(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.queue.close();
        }
    }
}

/// Crawls a share into the manifest.
pub struct Walker {
    db: ManifestDb,
    extractor: AclExtractor,
    config: WalkConfig,
    progress_tx: Option<mpsc::UnboundedSender<CrawlProgress>>,
}

impl Walker {
    pub fn new(db: ManifestDb, extractor: AclExtractor) -> Self {
        Self {
            db,
            extractor,
            config: WalkConfig::default(),
            progress_tx: None,
        }
    }

    pub fn with_config(mut self, config: WalkConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive a [`CrawlProgress`] after every flush.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<CrawlProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Walk `root` and persist one terminal record per reachable entry.
    ///
    /// The root itself is not recorded. An unreadable root or a manifest
    /// write failure aborts the run; everything else is recorded and skipped.
    pub async fn crawl(&self, root: &Path, cancel: &CancellationToken) -> Result<CrawlReport> {
        let start = Instant::now();
        let root = validate_root(root).await?;
        let workers = self.config.workers.max(1);
        let batch_size = self.config.batch_size.max(1);

        info!(
            root = %root.display(),
            workers,
            batch_size,
            acl_method = self.extractor.method().as_str(),
            "Starting crawl"
        );

        let (queue_tx, queue_rx) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
            queue: queue_tx,
            pending: AtomicUsize::new(0),
            unsupported: AtomicU64::new(0),
        });
        shared.enqueue(WorkItem::Directory {
            path: root.clone(),
            is_root: true,
        });

        let (record_tx, mut record_rx) = mpsc::channel::<DiscoveredEntry>(batch_size * 2);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let shared = Arc::clone(&shared);
            let queue_rx = queue_rx.clone();
            let record_tx = record_tx.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, shared, queue_rx, record_tx).await
            }));
        }
        drop(record_tx);
        drop(queue_rx);

        let mut report = CrawlReport::default();
        let mut batch = Vec::with_capacity(batch_size);
        let mut next_progress = self.config.progress_interval;

        let written: Result<()> = async {
            while let Some(entry) = record_rx.recv().await {
                report.count(&entry);
                batch.push(entry);
                if batch.len() >= batch_size {
                    self.flush(&mut batch, &mut report, &shared, start, &mut next_progress)
                        .await?;
                }
            }
            self.flush(&mut batch, &mut report, &shared, start, &mut next_progress)
                .await
        }
        .await;

        if let Err(e) = written {
            // Workers notice the closed queue and record channel and stop.
            shared.queue.close();
            drop(record_rx);
            for handle in handles {
                let _ = handle.await;
            }
            return Err(e);
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Io(io::Error::other(format!("walker worker failed: {}", e))))?;
        }

        report.unsupported = shared.unsupported.load(Ordering::SeqCst);
        report.cancelled = cancel.is_cancelled();
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            entries = report.entries,
            directories = report.directories,
            files = report.files,
            discovered = report.discovered,
            permission_denied = report.permission_denied,
            acl_failed = report.acl_failed,
            errors = report.errors,
            skipped = report.skipped,
            unsupported = report.unsupported,
            inserted = report.inserted,
            already_known = report.already_known,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Crawl complete"
        );

        Ok(report)
    }

    async fn flush(
        &self,
        batch: &mut Vec<DiscoveredEntry>,
        report: &mut CrawlReport,
        shared: &Shared,
        start: Instant,
        next_progress: &mut u64,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let summary = self.db.bulk_insert_ignoring_duplicates(batch).await?;
        report.inserted += summary.inserted;
        report.already_known += summary.skipped;
        batch.clear();

        let persisted = report.inserted + report.already_known;
        let progress = CrawlProgress {
            persisted,
            inserted: report.inserted,
            queued: shared.pending.load(Ordering::SeqCst),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        if self.config.progress_interval > 0 && persisted >= *next_progress {
            let secs = start.elapsed().as_secs_f64().max(0.001);
            info!(
                persisted,
                inserted = report.inserted,
                queued = progress.queued,
                rate = %format!("{:.0}/s", persisted as f64 / secs),
                "Crawl progress"
            );
            while *next_progress <= persisted {
                *next_progress += self.config.progress_interval;
            }
        }

        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
        }

        Ok(())
    }
}

async fn validate_root(root: &Path) -> Result<PathBuf> {
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| Error::config(format!("invalid root {}: {}", root.display(), e)))?;

    let meta = tokio::fs::metadata(&root)
        .await
        .map_err(|e| Error::config(format!("invalid root {}: {}", root.display(), e)))?;
    if !meta.is_dir() {
        return Err(Error::config(format!("root is not a directory: {}", root.display())));
    }

    let _listing = tokio::fs::read_dir(&root)
        .await
        .map_err(|e| Error::config(format!("root is not readable {}: {}", root.display(), e)))?;

    Ok(root)
}

async fn run_worker(
    worker_id: usize,
    shared: Arc<Shared>,
    queue: async_channel::Receiver<WorkItem>,
    records: mpsc::Sender<DiscoveredEntry>,
) {
    while let Ok(item) = queue.recv().await {
        // After cancellation, queued items are drained without being processed.
        let delivered = if shared.cancel.is_cancelled() {
            true
        } else {
            match item {
                WorkItem::Directory { path, is_root } => {
                    process_directory(&shared, &path, is_root, &records).await
                }
                WorkItem::File(path) => {
                    let entry = inspect_file(&shared, &path).await;
                    records.send(entry).await.is_ok()
                }
            }
        };

        shared.finish_item();

        if !delivered {
            shared.queue.close();
            break;
        }
    }
    debug!(worker_id, "Walker worker finished");
}

/// List one directory, record it, and dispatch its children.
///
/// Returns false once the writer has gone away.
async fn process_directory(
    shared: &Shared,
    dir: &Path,
    is_root: bool,
    records: &mpsc::Sender<DiscoveredEntry>,
) -> bool {
    let outcome = retry_with_backoff(
        &shared.config.dir_retry,
        shared.config.max_dir_retries,
        &TokioSleeper,
        |_| list_directory(dir),
    )
    .await;
    let retry_count = outcome.attempts.saturating_sub(1);

    let children = match outcome.result {
        Ok(children) => children,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, retries = retry_count, "Directory listing failed");
            if is_root {
                return true;
            }
            let mut entry = new_entry(dir, true, classify_io(&e)).with_error(e.to_string());
            entry.retry_count = retry_count;
            return records.send(entry).await.is_ok();
        }
    };

    if !is_root {
        let mut entry = new_entry(dir, true, FileStatus::Discovered);
        entry.retry_count = retry_count;
        if records.send(entry).await.is_err() {
            return false;
        }
    }

    for (path, file_type) in children {
        if shared.cancel.is_cancelled() {
            break;
        }

        let file_type = match file_type {
            Ok(file_type) => file_type,
            Err(e) => {
                let entry = new_entry(&path, false, classify_io(&e)).with_error(e.to_string());
                if records.send(entry).await.is_err() {
                    return false;
                }
                continue;
            }
        };

        if file_type.is_symlink() {
            let entry = new_entry(&path, false, FileStatus::Skipped).with_error(SYMLINK_SKIPPED);
            if records.send(entry).await.is_err() {
                return false;
            }
        } else if file_type.is_dir() {
            shared.enqueue(WorkItem::Directory {
                path,
                is_root: false,
            });
        } else if file_type.is_file() {
            if file_types::is_supported(&path) {
                shared.enqueue(WorkItem::File(path));
            } else {
                shared.unsupported.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            let entry = new_entry(&path, false, FileStatus::Skipped).with_error(UNSUPPORTED_ENTRY);
            if records.send(entry).await.is_err() {
                return false;
            }
        }
    }

    true
}

async fn list_directory(dir: &Path) -> io::Result<Vec<(PathBuf, io::Result<FileType>)>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut children = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        // DirEntry::file_type does not follow symlinks.
        let file_type = entry.file_type().await;
        children.push((entry.path(), file_type));
    }
    Ok(children)
}

/// Stat and ACL-extract one supported file. Always yields a terminal record.
async fn inspect_file(shared: &Shared, path: &Path) -> DiscoveredEntry {
    let timeout = shared.config.file_timeout;
    let mut entry = new_entry(path, false, FileStatus::Pending);

    match tokio::time::timeout(timeout, tokio::fs::symlink_metadata(path)).await {
        Err(_) => {
            entry.status = FileStatus::Error;
            entry.error = Some(format!("Stat timed out after {:?}", timeout));
            return entry;
        }
        Ok(Err(e)) => {
            entry.status = classify_io(&e);
            entry.error = Some(e.to_string());
            return entry;
        }
        Ok(Ok(meta)) => {
            entry.size = Some(meta.len() as i64);
            entry.mtime = unix_seconds(meta.modified());
        }
    }

    match tokio::time::timeout(timeout, shared.extractor.extract(path)).await {
        Err(_) => {
            entry.status = FileStatus::AclFailed;
            entry.error = Some(format!("ACL extraction timed out after {:?}", timeout));
        }
        Ok(Ok(capture)) => {
            entry.status = FileStatus::Discovered;
            entry.acl_captured = capture.captured && capture.raw_acl.is_some();
            entry.raw_acl = capture.raw_acl;
        }
        Ok(Err(AclError::PermissionDenied(msg))) => {
            entry.status = FileStatus::PermissionDenied;
            entry.error = Some(msg);
        }
        Ok(Err(e)) => {
            entry.status = FileStatus::AclFailed;
            entry.error = Some(e.to_string());
        }
    }

    debug!(path = %path.display(), status = %entry.status, "File inspected");
    entry
}

fn classify_io(e: &io::Error) -> FileStatus {
    match e.kind() {
        io::ErrorKind::PermissionDenied => FileStatus::PermissionDenied,
        _ => FileStatus::Error,
    }
}

fn new_entry(path: &Path, is_directory: bool, status: FileStatus) -> DiscoveredEntry {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent_dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    DiscoveredEntry::new(
        path.to_string_lossy().into_owned(),
        file_name,
        parent_dir,
        is_directory,
        status,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(classify_io(&denied), FileStatus::PermissionDenied);
        let other = io::Error::new(io::ErrorKind::Other, "stale handle");
        assert_eq!(classify_io(&other), FileStatus::Error);
    }

    #[test]
    fn test_new_entry_names() {
        let entry = new_entry(Path::new("/share/a/b.pdf"), false, FileStatus::Discovered);
        assert_eq!(entry.file_path, "/share/a/b.pdf");
        assert_eq!(entry.file_name, "b.pdf");
        assert_eq!(entry.parent_dir, "/share/a");
        assert!(!entry.is_directory);
    }

    #[test]
    fn test_report_counts() {
        let mut report = CrawlReport::default();
        report.count(&new_entry(Path::new("/s/d"), true, FileStatus::Discovered));
        report.count(&new_entry(Path::new("/s/x.pdf"), false, FileStatus::AclFailed));
        report.count(&new_entry(Path::new("/s/l.pdf"), false, FileStatus::Skipped));
        assert_eq!(report.entries, 3);
        assert_eq!(report.directories, 1);
        assert_eq!(report.files, 2);
        assert_eq!(report.discovered, 1);
        assert_eq!(report.acl_failed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_inspect_missing_file_is_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let (queue, _rx) = async_channel::unbounded();
        let shared = Shared {
            extractor: AclExtractor::Basic,
            config: WalkConfig::default(),
            cancel: CancellationToken::new(),
            queue,
            pending: AtomicUsize::new(0),
            unsupported: AtomicU64::new(0),
        };

        let entry = inspect_file(&shared, &temp.path().join("gone.pdf")).await;
        assert_eq!(entry.status, FileStatus::Error);
        assert!(entry.error.is_some());
        assert!(entry.size.is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_acl_timeout_marks_acl_failed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let getfacl = temp.path().join("slow-getfacl");
        std::fs::write(&getfacl, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&getfacl, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path = temp.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let (queue, _rx) = async_channel::unbounded();
        let shared = Shared {
            extractor: AclExtractor::Full { getfacl },
            config: WalkConfig {
                file_timeout: Duration::from_millis(200),
                ..WalkConfig::default()
            },
            cancel: CancellationToken::new(),
            queue,
            pending: AtomicUsize::new(0),
            unsupported: AtomicU64::new(0),
        };

        let entry = inspect_file(&shared, &path).await;
        assert_eq!(entry.status, FileStatus::AclFailed);
        assert!(entry.error.unwrap().contains("timed out"));
        assert_eq!(entry.size, Some(4));
        assert!(!entry.acl_captured);
    }

    #[test]
    fn test_queue_closes_when_drained() {
        let (queue, rx) = async_channel::unbounded();
        let shared = Shared {
            extractor: AclExtractor::None,
            config: WalkConfig::default(),
            cancel: CancellationToken::new(),
            queue,
            pending: AtomicUsize::new(0),
            unsupported: AtomicU64::new(0),
        };

        shared.enqueue(WorkItem::File(PathBuf::from("/s/a.pdf")));
        shared.enqueue(WorkItem::File(PathBuf::from("/s/b.pdf")));
        shared.finish_item();
        assert!(!rx.is_closed());
        shared.finish_item();
        assert!(rx.is_closed());
    }
}
