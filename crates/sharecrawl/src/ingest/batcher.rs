//! Sequential ingestion loop
//!
//! Pulls candidate files from the manifest one batch at a time, drops files
//! that vanished since the crawl, uploads the rest through the retry policy
//! and writes per-file outcomes back. Exactly one batch is in flight.

use super::checkpoint::{CheckpointState, CheckpointStore};
use super::client::{
    CollectionRequest, DocumentBackend, SplitOptions, Submission, UploadBatch, UploadDocument,
};
use super::retry::{retry_with_backoff, BackoffPolicy, Sleeper, TokioSleeper};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::file_types;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sharecrawl_db::{IngestionStatus, IngestionUpdate, ManifestDb, ManifestRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Error recorded for a candidate that is no longer on disk.
pub const FILE_NOT_FOUND: &str = "File not found on disk";

/// Behaviour of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub collection_name: String,
    pub batch_size: usize,
    pub checkpoint_interval: u64,
    pub checkpoint_path: PathBuf,
    pub resume: bool,
    pub create_collection: bool,
    pub continue_on_error: bool,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub batch_delay: Duration,
    pub blocking: bool,
    pub skip_existing: bool,
    pub retry_failed: bool,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub generate_summary: bool,
    pub embedding_dimension: u32,
}

impl IngestOptions {
    pub fn new(collection_name: impl Into<String>, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            collection_name: collection_name.into(),
            batch_size: 100,
            checkpoint_interval: 10,
            checkpoint_path: checkpoint_path.into(),
            resume: false,
            create_collection: false,
            continue_on_error: true,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            batch_delay: Duration::ZERO,
            blocking: false,
            skip_existing: false,
            retry_failed: false,
            chunk_size: 512,
            chunk_overlap: 150,
            generate_summary: false,
            embedding_dimension: 2048,
        }
    }
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_number: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Already present in the collection; marked completed without upload.
    pub skipped: u64,
    pub missing: u64,
}

/// Final report of an ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    /// Batches processed by this run.
    pub batches: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub missing: u64,
    /// Cumulative counters including any restored checkpoint.
    pub totals: Totals,
    pub recovered_in_flight: u64,
    /// Stopped early because `continue_on_error` is off.
    pub halted: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub batch_cursor: u64,
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl Totals {
    fn from_checkpoint(state: &CheckpointState) -> Self {
        Self {
            batch_cursor: state.batch_cursor,
            processed: state.total_processed,
            completed: state.total_completed,
            failed: state.total_failed,
        }
    }

    fn snapshot(&self) -> CheckpointState {
        CheckpointState {
            batch_cursor: self.batch_cursor,
            total_processed: self.processed,
            total_completed: self.completed,
            total_failed: self.failed,
            timestamp: Utc::now(),
        }
    }
}

/// Drives candidates from the manifest into a [`DocumentBackend`].
pub struct Ingestor<B> {
    db: ManifestDb,
    backend: B,
    options: IngestOptions,
    sleeper: Arc<dyn Sleeper>,
}

impl<B: DocumentBackend> Ingestor<B> {
    pub fn new(db: ManifestDb, backend: B, options: IngestOptions) -> Self {
        Self {
            db,
            backend,
            options,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the source of backoff and pacing delays.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run until no candidates remain, the run halts on error, or `cancel` trips.
    ///
    /// Only an unreachable backend at startup or a manifest failure is an
    /// `Err`; per-file failures are counted in the summary.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<IngestSummary> {
        let start = Instant::now();
        let opts = &self.options;

        self.backend
            .health()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if opts.create_collection {
            let request = CollectionRequest {
                collection_name: opts.collection_name.clone(),
                embedding_dimension: opts.embedding_dimension,
            };
            self.backend
                .create_collection(&request)
                .await
                .map_err(|e| Error::Backend(format!("create collection: {}", e)))?;
        }

        let mut summary = IngestSummary {
            recovered_in_flight: self.db.reset_ingestion_status(IngestionStatus::Ingesting).await?,
            ..Default::default()
        };
        if summary.recovered_in_flight > 0 {
            warn!(
                files = summary.recovered_in_flight,
                "Re-queued files left ingesting by an interrupted run"
            );
        }
        if opts.retry_failed {
            let requeued = self.db.reset_ingestion_status(IngestionStatus::Failed).await?;
            info!(files = requeued, "Re-queued previously failed files");
        }

        let checkpoints = CheckpointStore::new(&opts.checkpoint_path);
        let mut totals = if opts.resume {
            match checkpoints.load()? {
                Some(state) => {
                    info!(
                        batch_cursor = state.batch_cursor,
                        processed = state.total_processed,
                        saved_at = %state.timestamp,
                        "Resuming from checkpoint"
                    );
                    Totals::from_checkpoint(&state)
                }
                None => {
                    info!("No checkpoint found, resuming from manifest state");
                    Totals::default()
                }
            }
        } else {
            Totals::default()
        };

        let existing: HashSet<String> = if opts.skip_existing {
            let names = self
                .backend
                .list_documents(&opts.collection_name)
                .await
                .map_err(|e| Error::Backend(format!("list documents: {}", e)))?;
            info!(documents = names.len(), "Loaded existing collection documents");
            names.into_iter().collect()
        } else {
            HashSet::new()
        };

        let limit = u32::try_from(opts.batch_size).unwrap_or(u32::MAX);
        loop {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping before next batch");
                break;
            }

            // Finished rows leave the candidate set, so the head of the query is always unprocessed.
            let candidates = self.db.query_candidates(limit, 0).await?;
            if candidates.is_empty() {
                break;
            }

            totals.batch_cursor += 1;
            let report = self
                .process_batch(totals.batch_cursor, candidates, &existing)
                .await?;

            summary.batches += 1;
            summary.completed += report.completed;
            summary.failed += report.failed;
            summary.skipped += report.skipped;
            summary.missing += report.missing;
            totals.processed += report.completed + report.failed;
            totals.completed += report.completed;
            totals.failed += report.failed;

            info!(
                batch = report.batch_number,
                submitted = report.submitted,
                completed = report.completed,
                failed = report.failed,
                "Batch finished"
            );

            if summary.batches % opts.checkpoint_interval.max(1) == 0 {
                self.save_checkpoint(&checkpoints, &totals);
            }

            if report.failed > 0 && !opts.continue_on_error {
                warn!(
                    batch = report.batch_number,
                    failed = report.failed,
                    "Stopping after failed batch (continue_on_error is off)"
                );
                summary.halted = true;
                break;
            }

            if !opts.batch_delay.is_zero() {
                self.sleeper.sleep(opts.batch_delay).await;
            }
        }

        self.save_checkpoint(&checkpoints, &totals);

        summary.totals = totals;
        summary.cancelled = cancel.is_cancelled();
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            batches = summary.batches,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            missing = summary.missing,
            halted = summary.halted,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Ingestion run finished"
        );

        Ok(summary)
    }

    /// Checkpoints only speed up reporting, so a failed write is logged and skipped.
    fn save_checkpoint(&self, store: &CheckpointStore, totals: &Totals) {
        if let Err(e) = store.save(&totals.snapshot()) {
            warn!(path = %store.path().display(), error = %e, "Failed to write checkpoint");
        }
    }

    async fn process_batch(
        &self,
        batch_number: u64,
        candidates: Vec<ManifestRecord>,
        existing: &HashSet<String>,
    ) -> Result<BatchReport> {
        let opts = &self.options;
        let mut report = BatchReport {
            batch_number,
            ..Default::default()
        };
        let mut updates = Vec::with_capacity(candidates.len());
        let mut documents = Vec::with_capacity(candidates.len());

        for record in candidates {
            if existing.contains(&record.file_name) {
                debug!(path = %record.file_path, "Already in collection");
                updates.push(IngestionUpdate::new(&record.file_path, IngestionStatus::Completed));
                report.skipped += 1;
                report.completed += 1;
                continue;
            }

            match tokio::fs::read(&record.file_path).await {
                Ok(content) => {
                    updates.push(IngestionUpdate::new(&record.file_path, IngestionStatus::Ingesting));
                    documents.push(UploadDocument {
                        content_type: file_types::content_type(Path::new(&record.file_path)),
                        metadata: acl_metadata(record.raw_acl.as_deref()),
                        file_path: record.file_path,
                        file_name: record.file_name,
                        content: content.into(),
                    });
                }
                Err(e) => {
                    let message = if e.kind() == std::io::ErrorKind::NotFound {
                        report.missing += 1;
                        FILE_NOT_FOUND.to_string()
                    } else {
                        format!("Failed to read file: {}", e)
                    };
                    warn!(path = %record.file_path, error = %message, "Skipping unreadable file");
                    updates.push(
                        IngestionUpdate::new(&record.file_path, IngestionStatus::Failed)
                            .with_error(message),
                    );
                    report.failed += 1;
                }
            }
        }

        // Local outcomes and the ingesting marks land together, before any network call.
        self.db.update_ingestion_statuses(&updates).await?;

        if documents.is_empty() {
            return Ok(report);
        }

        let batch = UploadBatch {
            collection_name: opts.collection_name.clone(),
            blocking: opts.blocking,
            split_options: SplitOptions {
                chunk_size: opts.chunk_size,
                chunk_overlap: opts.chunk_overlap,
            },
            generate_summary: opts.generate_summary,
            documents,
        };
        report.submitted = batch.documents.len() as u64;

        // Only the submission is retried; once accepted, the batch is never sent again.
        let outcome = retry_with_backoff(
            &opts.backoff,
            opts.max_retries,
            self.sleeper.as_ref(),
            |_| self.backend.submit(&batch),
        )
        .await;
        let result = match outcome.result {
            Ok(Submission::Done(report)) => Ok(report),
            Ok(Submission::Task(task_id)) => {
                debug!(batch = batch_number, task_id = %task_id, "Waiting for ingestion task");
                self.backend.wait_for_task(&task_id).await
            }
            Err(e) => Err(e),
        };

        let mut results = Vec::with_capacity(batch.documents.len());
        match result {
            Ok(upload) => {
                for doc in &batch.documents {
                    match upload.failed.get(&doc.file_name) {
                        Some(message) => {
                            report.failed += 1;
                            results.push(
                                IngestionUpdate::new(&doc.file_path, IngestionStatus::Failed)
                                    .with_error(message.clone())
                                    .with_attempts(outcome.attempts),
                            );
                        }
                        None => {
                            report.completed += 1;
                            results.push(
                                IngestionUpdate::new(&doc.file_path, IngestionStatus::Completed)
                                    .with_attempts(outcome.attempts),
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    batch = batch_number,
                    attempts = outcome.attempts,
                    error = %e,
                    "Batch upload failed"
                );
                let message = e.to_string();
                for doc in &batch.documents {
                    report.failed += 1;
                    results.push(
                        IngestionUpdate::new(&doc.file_path, IngestionStatus::Failed)
                            .with_error(message.clone())
                            .with_attempts(outcome.attempts),
                    );
                }
            }
        }

        self.db.update_ingestion_statuses(&results).await?;
        Ok(report)
    }
}

/// Document metadata from the stored ACL: a JSON object is used as-is,
/// anything else is wrapped as `{"acl": raw}`.
pub fn acl_metadata(raw_acl: Option<&str>) -> Value {
    match raw_acl {
        None => Value::Object(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => json!({ "acl": raw }),
        },
    }
}
