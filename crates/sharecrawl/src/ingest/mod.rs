//! Ingestion phase: manifest candidates to the retrieval backend.

mod batcher;
mod checkpoint;
mod client;
mod retry;

pub use batcher::{acl_metadata, BatchReport, IngestOptions, IngestSummary, Ingestor, Totals, FILE_NOT_FOUND};
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use client::{
    CollectionRequest, DocumentBackend, IngestorClient, SplitOptions, Submission, UploadBatch,
    UploadDocument, UploadError, UploadOptions, UploadReport,
};
pub use retry::{
    retry_with_backoff, BackoffPolicy, RecordingSleeper, RetryOutcome, Retryable, SleepFuture,
    Sleeper, TokioSleeper,
};
