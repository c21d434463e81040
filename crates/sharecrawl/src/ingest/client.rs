//! HTTP client for the document ingestor service
//!
//! Endpoints used:
//! - `GET  /v1/health`
//! - `POST /v1/collections` (create, JSON body)
//! - `GET  /v1/documents?collection_name=` (list)
//! - `POST /v1/documents` (multipart: one `files` part per document plus a `data` JSON part)
//! - `GET  /v1/status?task_id=` (poll an asynchronous ingestion task)

use super::retry::Retryable;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Failure of one backend call.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Connection refused, reset, timed out, DNS failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// The request could not be built (bad proxy URL, bad MIME type).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("ingestion task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("ingestion task {task_id} still running after {waited:?}")]
    TaskTimeout { task_id: String, waited: Duration },
}

impl Retryable for UploadError {
    /// Transport failures, request timeouts, rate limiting and 5xx are worth retrying.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status >= 500
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

/// One file ready for submission.
#[derive(Debug, Clone)]
pub struct UploadDocument {
    pub file_path: String,
    pub file_name: String,
    pub content_type: &'static str,
    pub content: Bytes,
    /// Document-level metadata (the stored ACL).
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitOptions {
    pub chunk_size: u32,
    pub chunk_overlap: u32,
}

/// One multipart submission.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub collection_name: String,
    pub blocking: bool,
    pub split_options: SplitOptions,
    pub generate_summary: bool,
    pub documents: Vec<UploadDocument>,
}

impl UploadBatch {
    /// JSON carried in the `data` part.
    pub fn payload(&self) -> Value {
        let custom_metadata: Vec<Value> = self
            .documents
            .iter()
            .map(|doc| json!({ "filename": doc.file_name, "metadata": doc.metadata }))
            .collect();

        json!({
            "collection_name": self.collection_name,
            "blocking": self.blocking,
            "split_options": self.split_options,
            "custom_metadata": custom_metadata,
            "generate_summary": self.generate_summary,
        })
    }
}

/// What the backend did with an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Processed inline; per-file outcomes are known.
    Done(UploadReport),
    /// Queued as an asynchronous task to be polled.
    Task(String),
}

/// Per-file result of a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Document name to backend error message, for files the backend rejected.
    pub failed: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub collection_name: String,
    pub embedding_dimension: u32,
}

impl CollectionRequest {
    fn body(&self) -> Value {
        json!({
            "collection_name": self.collection_name,
            "embedding_dimension": self.embedding_dimension,
            "metadata_schema": [{
                "name": "allowed_sids",
                "type": "array",
                "array_type": "string",
                "description": "Security identifiers allowed to read the document",
            }],
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct DocumentsResponse {
    #[serde(default, alias = "task")]
    task_id: Option<String>,
    #[serde(default)]
    failed_documents: Vec<FailedDocument>,
}

#[derive(Debug, Deserialize)]
struct FailedDocument {
    document_name: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    state: String,
    #[serde(default)]
    result: Option<DocumentsResponse>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<ListedDocument>,
}

#[derive(Debug, Deserialize)]
struct ListedDocument {
    document_name: String,
}

impl From<DocumentsResponse> for UploadReport {
    fn from(response: DocumentsResponse) -> Self {
        Self {
            failed: response
                .failed_documents
                .into_iter()
                .map(|doc| (doc.document_name, doc.error_message))
                .collect(),
        }
    }
}

// ============================================================================
// Backend seam
// ============================================================================

/// Operations the ingestion loop needs from the retrieval backend.
pub trait DocumentBackend: Send + Sync {
    fn health(&self) -> impl Future<Output = Result<(), UploadError>> + Send;

    /// Create the collection. An already existing collection is not an error.
    fn create_collection(
        &self,
        request: &CollectionRequest,
    ) -> impl Future<Output = Result<(), UploadError>> + Send;

    /// Names of documents already in the collection.
    fn list_documents(
        &self,
        collection_name: &str,
    ) -> impl Future<Output = Result<Vec<String>, UploadError>> + Send;

    /// Send the batch once. This is the only call that transfers documents.
    fn submit(
        &self,
        batch: &UploadBatch,
    ) -> impl Future<Output = Result<Submission, UploadError>> + Send;

    /// Wait for an accepted task to finish. Never resubmits the batch.
    fn wait_for_task(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<UploadReport, UploadError>> + Send;

    /// Submit, then wait for the task if the backend queued one.
    fn upload(
        &self,
        batch: &UploadBatch,
    ) -> impl Future<Output = Result<UploadReport, UploadError>> + Send {
        async move {
            match self.submit(batch).await? {
                Submission::Done(report) => Ok(report),
                Submission::Task(task_id) => self.wait_for_task(&task_id).await,
            }
        }
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Connection settings for [`IngestorClient`].
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl UploadOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(3_600),
            http_proxy: None,
            https_proxy: None,
        }
    }
}

/// API client for the ingestor service
pub struct IngestorClient {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl IngestorClient {
    pub fn new(options: UploadOptions) -> Result<Self, UploadError> {
        let mut builder = Client::builder().timeout(options.request_timeout);
        if let Some(proxy) = &options.http_proxy {
            builder = builder.proxy(
                reqwest::Proxy::http(proxy)
                    .map_err(|e| UploadError::InvalidRequest(format!("http proxy: {}", e)))?,
            );
        }
        if let Some(proxy) = &options.https_proxy {
            builder = builder.proxy(
                reqwest::Proxy::https(proxy)
                    .map_err(|e| UploadError::InvalidRequest(format!("https proxy: {}", e)))?,
            );
        }

        Ok(Self {
            client: builder.build()?,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            poll_interval: options.poll_interval,
            poll_timeout: options.poll_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One status request: `Some` once the task is finished.
    async fn poll_task(&self, task_id: &str) -> Result<Option<UploadReport>, UploadError> {
        let response = self
            .client
            .get(self.url("/v1/status"))
            .query(&[("task_id", task_id)])
            .send()
            .await?;
        let body = read_body(response).await?;
        let status: TaskStatus = serde_json::from_str(&body)
            .map_err(|e| UploadError::Malformed(format!("task status: {}", e)))?;

        match status.state.to_ascii_uppercase().as_str() {
            "FINISHED" | "COMPLETED" | "SUCCESS" => Ok(Some(status.result.unwrap_or_default().into())),
            "FAILED" | "ERROR" => Err(UploadError::TaskFailed {
                task_id: task_id.to_string(),
                message: status.message.unwrap_or_else(|| "no message".to_string()),
            }),
            _ => Ok(None),
        }
    }
}

impl DocumentBackend for IngestorClient {
    async fn health(&self) -> Result<(), UploadError> {
        let response = self.client.get(self.url("/v1/health")).send().await?;
        read_body(response).await.map(|_| ())
    }

    async fn create_collection(&self, request: &CollectionRequest) -> Result<(), UploadError> {
        let response = self
            .client
            .post(self.url("/v1/collections"))
            .json(&request.body())
            .send()
            .await?;

        match read_body(response).await {
            Ok(_) => {
                info!(collection = %request.collection_name, "Collection created");
                Ok(())
            }
            Err(UploadError::Status { status, body })
                if status == StatusCode::CONFLICT.as_u16() || body.contains("already exists") =>
            {
                info!(collection = %request.collection_name, "Collection already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_documents(&self, collection_name: &str) -> Result<Vec<String>, UploadError> {
        let response = self
            .client
            .get(self.url("/v1/documents"))
            .query(&[("collection_name", collection_name)])
            .send()
            .await?;
        let body = read_body(response).await?;
        let list: DocumentList = serde_json::from_str(&body)
            .map_err(|e| UploadError::Malformed(format!("document list: {}", e)))?;
        Ok(list.documents.into_iter().map(|d| d.document_name).collect())
    }

    async fn submit(&self, batch: &UploadBatch) -> Result<Submission, UploadError> {
        let mut form = Form::new();
        for doc in &batch.documents {
            let part = Part::stream_with_length(doc.content.clone(), doc.content.len() as u64)
                .file_name(doc.file_name.clone())
                .mime_str(doc.content_type)?;
            form = form.part("files", part);
        }
        let payload = serde_json::to_vec(&batch.payload())
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        let data = Part::bytes(payload)
            .file_name("payload.json")
            .mime_str("application/json")?;
        form = form.part("data", data);

        debug!(documents = batch.documents.len(), "Submitting batch");
        let response = self
            .client
            .post(self.url("/v1/documents"))
            .multipart(form)
            .send()
            .await?;
        let body = read_body(response).await?;

        let parsed: DocumentsResponse = if body.trim().is_empty() {
            DocumentsResponse::default()
        } else {
            serde_json::from_str(&body)
                .map_err(|e| UploadError::Malformed(format!("upload response: {}", e)))?
        };

        match parsed.task_id.clone() {
            Some(task_id) if !batch.blocking => Ok(Submission::Task(task_id)),
            _ => Ok(Submission::Done(parsed.into())),
        }
    }

    /// Transient status errors are logged and polled through until `poll_timeout`.
    async fn wait_for_task(&self, task_id: &str) -> Result<UploadReport, UploadError> {
        let started = Instant::now();
        loop {
            match self.poll_task(task_id).await {
                Ok(Some(report)) => {
                    debug!(task_id, elapsed_ms = started.elapsed().as_millis() as u64, "Task finished");
                    return Ok(report);
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!(task_id, error = %e, "Task status unavailable, polling again");
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= self.poll_timeout {
                return Err(UploadError::TaskTimeout {
                    task_id: task_id.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Body of a successful response, or a `Status` error carrying the (truncated) body.
async fn read_body(response: Response) -> Result<String, UploadError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(UploadError::Status {
            status: status.as_u16(),
            body: truncate(body),
        })
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, metadata: Value) -> UploadDocument {
        UploadDocument {
            file_path: format!("/share/{}", name),
            file_name: name.to_string(),
            content_type: "application/pdf",
            content: Bytes::from_static(b"%PDF"),
            metadata,
        }
    }

    #[test]
    fn test_retry_classification() {
        let status = |status| UploadError::Status {
            status,
            body: String::new(),
        };
        assert!(UploadError::Transport("reset".into()).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(413).is_retryable());
        assert!(!UploadError::Malformed("bad json".into()).is_retryable());
    }

    #[test]
    fn test_payload_shape() {
        let batch = UploadBatch {
            collection_name: "docs".into(),
            blocking: false,
            split_options: SplitOptions {
                chunk_size: 512,
                chunk_overlap: 150,
            },
            generate_summary: false,
            documents: vec![doc("a.pdf", json!({ "acl": "user::rw-" }))],
        };

        let payload = batch.payload();
        assert_eq!(payload["collection_name"], "docs");
        assert_eq!(payload["split_options"]["chunk_size"], 512);
        assert_eq!(payload["custom_metadata"][0]["filename"], "a.pdf");
        assert_eq!(payload["custom_metadata"][0]["metadata"]["acl"], "user::rw-");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate(body);
        assert!(cut.len() <= MAX_ERROR_BODY + 3);
        assert!(cut.ends_with("..."));
    }
}
