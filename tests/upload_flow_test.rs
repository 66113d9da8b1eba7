//! End-to-end upload flow
//!
//! The issuance server signs URLs for a wiremock "bucket", and the
//! controller streams files to it through the real HTTP issuer and
//! transport.

mod common;

use bytes::Bytes;
use common::{storage_config, test_config, TestServer, TEST_BUCKET};
use std::time::Duration;
use tsubame_uploadr::client::{SelectedFile, UploadController, UploadEvent, UploadStatus};
use tsubame_uploadr::config::ClientConfig;
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY_PATH: &str = r"^/test-bucket/uploads/report-\d{13}-[0-9a-f]{16}\.pdf$";

async fn setup() -> (MockServer, TestServer, UploadController) {
    let storage = MockServer::start().await;
    let server = TestServer::start(test_config(storage_config(&storage.uri()))).await;
    let controller = UploadController::from_config(&ClientConfig {
        issuer_url: server.base_url(),
        request_timeout_seconds: 5,
    })
    .unwrap();
    (storage, server, controller)
}

fn report() -> SelectedFile {
    SelectedFile::from_bytes(
        "report.pdf",
        "application/pdf",
        Bytes::from(vec![0x25u8; 200 * 1024]),
    )
}

async fn settle(controller: &UploadController) {
    tokio::time::timeout(Duration::from_secs(10), controller.wait_idle())
        .await
        .expect("uploads did not settle");
}

#[tokio::test]
async fn test_upload_completes() {
    let (storage, _server, controller) = setup().await;
    Mock::given(method("PUT"))
        .and(path_regex(KEY_PATH))
        .and(header("content-type", "application/pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&storage)
        .await;

    let mut events = controller.subscribe();
    let id = controller.add_files([report()])[0];
    settle(&controller).await;

    let record = controller.get(id).unwrap();
    assert_eq!(record.status, UploadStatus::Completed);
    assert_eq!(record.progress, 100);
    let file_key = record.file_key.clone().unwrap();
    assert_eq!(
        record.file_url.as_deref().unwrap(),
        format!("{}/{}/{}", storage.uri(), TEST_BUCKET, file_key)
    );

    let received = storage.received_requests().await.unwrap();
    assert_eq!(received[0].body.len(), 200 * 1024);

    let mut saw_completed = false;
    let mut last_progress = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            UploadEvent::Updated(record) => {
                assert!(record.progress >= last_progress);
                last_progress = record.progress;
            }
            UploadEvent::Completed { file_key: key, .. } => {
                assert_eq!(key, file_key);
                saw_completed = true;
            }
            UploadEvent::Removed(_) => panic!("nothing was canceled"),
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn test_storage_failure_then_retry() {
    let (storage, _server, controller) = setup().await;
    Mock::given(method("PUT"))
        .and(path_regex(KEY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&storage)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(KEY_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&storage)
        .await;

    let id = controller.add_files([report()])[0];
    settle(&controller).await;

    let failed = controller.get(id).unwrap();
    assert_eq!(failed.status, UploadStatus::Error);
    assert!(failed.error.as_deref().unwrap().contains("500"));

    assert!(controller.retry(id));
    let retrying = controller.get(id).unwrap();
    assert_eq!(retrying.progress, 0);
    assert!(retrying.error.is_none());
    settle(&controller).await;

    let record = controller.get(id).unwrap();
    assert_eq!(record.status, UploadStatus::Completed);
    assert_eq!(record.progress, 100);

    let received = storage.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_ne!(received[0].url.path(), received[1].url.path());
}

#[tokio::test]
async fn test_rejected_by_server_validation() {
    let (storage, server, _controller) = setup().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&storage)
        .await;

    // A client that skips local validation still hits the server's checks
    let issuer = tsubame_uploadr::client::HttpUrlIssuer::new(
        &server.base_url(),
        Duration::from_secs(5),
    )
    .unwrap();
    let err = tsubame_uploadr::client::UrlIssuer::issue(
        &issuer,
        &tsubame_uploadr::issuance::IssueRequest::new("a.exe", "application/x-msdownload", Some(1)),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Failed to get upload URL: Invalid file type or extension"
    );
}

#[tokio::test]
async fn test_cancel_during_transfer() {
    let (storage, _server, controller) = setup().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&storage)
        .await;

    let id = controller.add_files([report()])[0];
    tokio::time::timeout(Duration::from_secs(5), async {
        while storage.received_requests().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transfer never started");

    assert!(controller.cancel(id));
    assert!(controller.snapshot().is_empty());
    settle(&controller).await;
    assert!(controller.get(id).is_none());
}

#[tokio::test]
async fn test_issuer_unreachable() {
    let controller = UploadController::from_config(&ClientConfig {
        issuer_url: "http://127.0.0.1:9".into(),
        request_timeout_seconds: 2,
    })
    .unwrap();

    let id = controller.add_files([report()])[0];
    settle(&controller).await;

    let record = controller.get(id).unwrap();
    assert_eq!(record.status, UploadStatus::Error);
    assert!(record
        .error
        .as_deref()
        .unwrap()
        .starts_with("Failed to get upload URL"));
}
