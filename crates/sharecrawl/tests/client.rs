//! HTTP behaviour of the ingestor client against a mock server.

use serde_json::json;
use sharecrawl::ingest::{
    CollectionRequest, DocumentBackend, IngestOptions, Ingestor, IngestorClient, RecordingSleeper,
    Retryable, SplitOptions, UploadBatch, UploadDocument, UploadError, UploadOptions,
};
use sharecrawl::{CancellationToken, ManifestDb};
use sharecrawl_db::{DiscoveredEntry, FileStatus, IngestionStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_string_contains, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> IngestorClient {
    let mut options = UploadOptions::new(server.uri());
    options.request_timeout = Duration::from_secs(5);
    options.poll_interval = Duration::from_millis(10);
    options.poll_timeout = Duration::from_secs(5);
    IngestorClient::new(options).unwrap()
}

fn batch(names: &[&str], blocking: bool) -> UploadBatch {
    UploadBatch {
        collection_name: "docs".to_string(),
        blocking,
        split_options: SplitOptions {
            chunk_size: 512,
            chunk_overlap: 150,
        },
        generate_summary: false,
        documents: names
            .iter()
            .map(|name| UploadDocument {
                file_path: format!("/share/{}", name),
                file_name: name.to_string(),
                content_type: "application/pdf",
                content: format!("body of {}", name).into(),
                metadata: json!({ "acl": "user::rw-" }),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).health().await.unwrap();
}

#[tokio::test]
async fn test_upload_sends_multipart_and_reads_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .and(body_string_contains("name=\"files\""))
        .and(body_string_contains("filename=\"payload.json\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "done",
            "failed_documents": [
                { "document_name": "b.pdf", "error_message": "corrupt file" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = client(&server)
        .upload(&batch(&["a.pdf", "b.pdf"], true))
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed.get("b.pdf").map(String::as_str), Some("corrupt file"));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("filename=\"a.pdf\""));
    assert!(body.contains("filename=\"b.pdf\""));
    assert!(body.contains("\"collection_name\":\"docs\""));
    assert!(body.contains("\"custom_metadata\""));
    assert!(body.contains("body of a.pdf"));
}

#[tokio::test]
async fn test_server_errors_are_retryable_client_errors_are_not() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .mount(&server)
        .await;

    let client = client(&server);
    let unavailable = client.upload(&batch(&["a.pdf"], true)).await.unwrap_err();
    assert!(matches!(unavailable, UploadError::Status { status: 503, .. }));
    assert!(unavailable.is_retryable());

    let rejected = client.upload(&batch(&["a.pdf"], true)).await.unwrap_err();
    match &rejected {
        UploadError::Status { status, body } => {
            assert_eq!(*status, 400);
            assert_eq!(body, "bad payload");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!rejected.is_retryable());
}

#[tokio::test]
async fn test_malformed_response_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server).upload(&batch(&["a.pdf"], true)).await.unwrap_err();
    assert!(matches!(err, UploadError::Malformed(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Nothing listens on a port whose listener was just dropped.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = IngestorClient::new(UploadOptions::new(format!("http://127.0.0.1:{}", port))).unwrap();
    let err = client.health().await.unwrap_err();
    assert!(matches!(err, UploadError::Transport(_)), "{:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_non_blocking_upload_polls_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_id": "t-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .and(query_param("task_id", "t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "PENDING" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .and(query_param("task_id", "t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "FINISHED",
            "result": {
                "failed_documents": [{ "document_name": "a.pdf", "error_message": "no text" }]
            }
        })))
        .mount(&server)
        .await;

    let report = client(&server)
        .upload(&batch(&["a.pdf", "b.pdf"], false))
        .await
        .unwrap();
    assert_eq!(report.failed.get("a.pdf").map(String::as_str), Some("no text"));
    assert!(!report.failed.contains_key("b.pdf"));

    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/v1/status")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn test_status_error_is_polled_through_without_resubmitting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_id": "t-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("status store restarting"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "FINISHED" })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.pdf");
    std::fs::write(&file, b"%PDF").unwrap();
    let db = ManifestDb::open(temp.path().join("manifest.db")).await.unwrap();
    db.bulk_insert_ignoring_duplicates(&[DiscoveredEntry::new(
        file.to_string_lossy().into_owned(),
        "a.pdf",
        temp.path().to_string_lossy().into_owned(),
        false,
        FileStatus::Discovered,
    )])
    .await
    .unwrap();

    let options = IngestOptions::new("docs", temp.path().join("checkpoint.json"));
    let summary = Ingestor::new(db.clone(), client(&server), options)
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    let requests = server.received_requests().await.unwrap();
    let submits = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/v1/documents")
        .count();
    let polls = requests.iter().filter(|r| r.url.path() == "/v1/status").count();
    assert_eq!(submits, 1);
    assert_eq!(polls, 2);

    let record = db.get(&file.to_string_lossy()).await.unwrap().unwrap();
    assert_eq!(record.ingestion_status, IngestionStatus::Completed);
    assert_eq!(record.ingestion_attempts, 1);
}

#[tokio::test]
async fn test_failed_task_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_id": "t-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "FAILED",
            "message": "embedding service down"
        })))
        .mount(&server)
        .await;

    let err = client(&server).upload(&batch(&["a.pdf"], false)).await.unwrap_err();
    match &err {
        UploadError::TaskFailed { task_id, message } => {
            assert_eq!(task_id, "t-2");
            assert_eq!(message, "embedding service down");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_poll_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_id": "t-3" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "PENDING" })))
        .mount(&server)
        .await;

    let mut options = UploadOptions::new(server.uri());
    options.poll_interval = Duration::from_millis(5);
    options.poll_timeout = Duration::ZERO;
    let client = IngestorClient::new(options).unwrap();

    let err = client.upload(&batch(&["a.pdf"], false)).await.unwrap_err();
    assert!(matches!(err, UploadError::TaskTimeout { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_create_collection_tolerates_existing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/collections"))
        .and(body_string_contains("allowed_sids"))
        .respond_with(ResponseTemplate::new(409).set_body_string("collection exists"))
        .expect(1)
        .mount(&server)
        .await;

    let request = CollectionRequest {
        collection_name: "docs".to_string(),
        embedding_dimension: 2048,
    };
    client(&server).create_collection(&request).await.unwrap();
}

#[tokio::test]
async fn test_create_collection_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/collections"))
        .respond_with(ResponseTemplate::new(500).set_body_string("milvus unavailable"))
        .mount(&server)
        .await;

    let request = CollectionRequest {
        collection_name: "docs".to_string(),
        embedding_dimension: 2048,
    };
    let err = client(&server).create_collection(&request).await.unwrap_err();
    assert!(matches!(err, UploadError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_list_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/documents"))
        .and(query_param("collection_name", "docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [
                { "document_name": "a.pdf", "metadata": {} },
                { "document_name": "b.pdf" }
            ]
        })))
        .mount(&server)
        .await;

    let names = client(&server).list_documents("docs").await.unwrap();
    assert_eq!(names, vec!["a.pdf".to_string(), "b.pdf".to_string()]);
}

#[tokio::test]
async fn test_ingestor_against_http_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "failed_documents": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let share = temp.path().join("share");
    std::fs::create_dir_all(&share).unwrap();
    let db = ManifestDb::open(temp.path().join("manifest.db")).await.unwrap();
    let mut entries = Vec::new();
    for name in ["a.pdf", "b.txt"] {
        let file = share.join(name);
        std::fs::write(&file, b"data").unwrap();
        entries.push(DiscoveredEntry::new(
            file.to_string_lossy().into_owned(),
            name,
            share.to_string_lossy().into_owned(),
            false,
            FileStatus::Discovered,
        ));
    }
    db.bulk_insert_ignoring_duplicates(&entries).await.unwrap();

    let mut options = IngestOptions::new("docs", temp.path().join("checkpoint.json"));
    options.blocking = true;
    let summary = Ingestor::new(db.clone(), client(&server), options)
        .with_sleeper(Arc::new(RecordingSleeper::new()))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    for entry in &entries {
        let record = db.get(&entry.file_path).await.unwrap().unwrap();
        assert_eq!(record.ingestion_status, IngestionStatus::Completed);
    }
}
