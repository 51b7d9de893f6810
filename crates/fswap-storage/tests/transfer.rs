//! Upload and download behavior against a local mock server.

use std::time::{Duration, Instant};

use fswap_storage::{
    download_file, download_file_with_idle_timeout, StorageError, SuccessPolicy, UploadConfig,
    UploadSupervisor,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> UploadConfig {
    UploadConfig {
        max_retries: 3,
        stall_timeout: Duration::from_secs(5),
        backoff_unit: Duration::from_millis(50),
        chunk_size: 4,
        ..Default::default()
    }
}

async fn artifact(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("media_out.mp4");
    tokio::fs::write(&file, contents).await.unwrap();
    (dir, file)
}

#[tokio::test]
async fn upload_succeeds_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bucket/media_out.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, file) = artifact(b"0123456789abcdef").await;
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), fast_config());

    let ok = supervisor
        .upload(&file, &format!("{}/bucket/media_out.mp4", server.uri()))
        .await;
    assert!(ok);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"0123456789abcdef");
    assert_eq!(
        requests[0].headers.get("content-length").unwrap().to_str().unwrap(),
        "16"
    );
}

#[tokio::test]
async fn upload_gives_up_after_max_retries_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (_dir, file) = artifact(b"payload").await;
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), fast_config());

    let started = Instant::now();
    let ok = supervisor
        .upload(&file, &format!("{}/bucket/out", server.uri()))
        .await;

    assert!(!ok);
    // 1 * 50ms + 2 * 50ms between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn upload_retries_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let (_dir, file) = artifact(b"payload").await;
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), fast_config());

    assert!(supervisor.upload(&file, &format!("{}/out", server.uri())).await);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn upload_abandons_stalled_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let (_dir, file) = artifact(b"payload").await;
    let config = UploadConfig {
        max_retries: 2,
        stall_timeout: Duration::from_millis(200),
        backoff_unit: Duration::from_millis(10),
        ..Default::default()
    };
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), config);

    let started = Instant::now();
    let ok = supervisor.upload(&file, &format!("{}/out", server.uri())).await;

    assert!(!ok);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn strict_policy_rejects_created() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, file) = artifact(b"payload").await;
    let config = UploadConfig {
        max_retries: 1,
        success_policy: SuccessPolicy::OkOrNoContent,
        ..fast_config()
    };
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), config);

    assert!(!supervisor.upload(&file, &format!("{}/out", server.uri())).await);
}

#[tokio::test]
async fn missing_file_fails_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let supervisor = UploadSupervisor::new(reqwest::Client::new(), fast_config());

    let started = Instant::now();
    let ok = supervisor
        .upload(dir.path().join("missing.mp4"), &format!("{}/out", server.uri()))
        .await;
    assert!(!ok);
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn download_writes_body_to_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/input.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("input.mp4");
    let bytes = download_file(
        &reqwest::Client::new(),
        &format!("{}/media/input.mp4", server.uri()),
        &dest,
    )
    .await
    .unwrap();

    assert_eq!(bytes, 2048);
    assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 2048);
}

#[tokio::test]
async fn download_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("reface.png");
    let result = download_file(
        &reqwest::Client::new(),
        &format!("{}/face.png", server.uri()),
        &dest,
    )
    .await;

    assert!(matches!(result, Err(StorageError::DownloadFailed(_))));
    assert!(!dest.exists());
}

#[tokio::test]
async fn download_abandons_silent_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![1u8; 16])
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("input.mp4");
    let started = Instant::now();
    let result = download_file_with_idle_timeout(
        &reqwest::Client::new(),
        &format!("{}/media/input.mp4", server.uri()),
        &dest,
        Duration::from_millis(200),
    )
    .await;

    assert!(matches!(result, Err(StorageError::Stalled(d)) if d == Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!dest.exists());
}
