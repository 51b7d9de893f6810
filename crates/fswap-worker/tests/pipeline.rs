//! End-to-end pipeline runs against stand-in tools and an HTTP mock.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fswap_models::{
    FetchTaskRequest, ProgressUpdate, SignedUpload, Task, TaskId, TaskPhase, TaskStateUpdate,
};
use fswap_queue::{QueueError, QueueResult, TaskApi};
use fswap_storage::UploadConfig;
use fswap_worker::{PollOutcome, TaskExecutor, WorkerConfig};
use serde_json::json;
use tempfile::TempDir;
use tokio_test::assert_ok;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Task API double that hands out at most one task and records every call.
struct RecordingApi {
    task: Mutex<Option<Task>>,
    upload_base: String,
    fetches: Mutex<Vec<FetchTaskRequest>>,
    updates: Mutex<Vec<TaskStateUpdate>>,
    progress: Mutex<Vec<ProgressUpdate>>,
    reject_progress: bool,
}

impl RecordingApi {
    fn new(task: Option<Task>, upload_base: &str) -> Arc<Self> {
        Self::build(task, upload_base, false)
    }

    fn rejecting_progress(task: Option<Task>, upload_base: &str) -> Arc<Self> {
        Self::build(task, upload_base, true)
    }

    fn build(task: Option<Task>, upload_base: &str, reject_progress: bool) -> Arc<Self> {
        Arc::new(Self {
            task: Mutex::new(task),
            upload_base: upload_base.to_string(),
            fetches: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            reject_progress,
        })
    }

    fn updates(&self) -> Vec<TaskStateUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for RecordingApi {
    async fn fetch_task(&self, request: &FetchTaskRequest) -> QueueResult<Option<Task>> {
        self.fetches.lock().unwrap().push(request.clone());
        Ok(self.task.lock().unwrap().take())
    }

    async fn update_state(&self, update: &TaskStateUpdate) -> QueueResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn report_progress(&self, _task_id: &TaskId, update: &ProgressUpdate) -> QueueResult<()> {
        if self.reject_progress {
            return Err(QueueError::rejected("progress endpoint down"));
        }
        self.progress.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn sign_upload(&self, filename: &str) -> QueueResult<SignedUpload> {
        if filename.is_empty() {
            return Err(QueueError::rejected("empty filename"));
        }
        Ok(SignedUpload {
            url: format!("{}/upload/{}", self.upload_base, filename),
            pub_url: format!("https://cdn.example.com/{}", filename),
        })
    }
}

fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Writes its last argument, like ffmpeg and convert do.
const WRITE_LAST_ARG: &str = r#"for a in "$@"; do out="$a"; done
echo data > "$out""#;

/// Writes the value after `-o` and prints one progress line.
const FAKE_FACEFUSION: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "[FACE_SWAPPER] Processing:  50%|#####     | 5/10, 20.00frame/s" >&2
echo swapped > "$out""#;

struct Harness {
    _work: TempDir,
    _tools: TempDir,
    config: WorkerConfig,
}

fn harness(ffmpeg_body: &str) -> Harness {
    let work = tempfile::tempdir().unwrap();
    let tools = tempfile::tempdir().unwrap();

    let config = WorkerConfig {
        work_dir: work.path().to_path_buf(),
        poll_backoff: Duration::from_millis(10),
        progress_interval: Duration::ZERO,
        ffmpeg_program: write_tool(tools.path(), "ffmpeg", ffmpeg_body)
            .to_string_lossy()
            .to_string(),
        convert_program: write_tool(tools.path(), "convert", WRITE_LAST_ARG)
            .to_string_lossy()
            .to_string(),
        python_program: write_tool(tools.path(), "python", FAKE_FACEFUSION)
            .to_string_lossy()
            .to_string(),
        upload: UploadConfig {
            max_retries: 2,
            backoff_unit: Duration::from_millis(10),
            ..UploadConfig::default()
        },
        ..WorkerConfig::default()
    };

    Harness {
        _work: work,
        _tools: tools,
        config,
    }
}

async fn media_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/clip.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"GIF89a....".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/face.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 512]))
        .mount(&server)
        .await;
    server
}

fn task(params: serde_json::Value) -> Task {
    serde_json::from_value(json!({
        "_id": "task-1",
        "name": "faceSwapApi",
        "user_id": "user-9",
        "params": params
    }))
    .unwrap()
}

#[tokio::test]
async fn test_video_task_completes_with_result_and_thumbnail() {
    let server = media_server().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/upload/.+"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [{"to_face": format!("{}/face.png", server.uri())}],
            "media_id": "m-1"
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Done));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, 3);
    assert_eq!(updates[0].result["user_id"], "user-9");
    assert_eq!(updates[0].result["media_id"], "m-1");
    let file_url = updates[0].result["file_url"].as_str().unwrap();
    assert!(file_url.starts_with("https://cdn.example.com/task-1_"));
    assert!(file_url.ends_with("media_out.mp4"));
    assert!(updates[0].result["thumb_url"]
        .as_str()
        .unwrap()
        .ends_with("thumb_media.jpg"));

    let progress = api.progress.lock().unwrap().clone();
    assert!(!progress.is_empty());
    assert_eq!(progress[0].progress, 50);
    assert_eq!(progress[0].frame_count, "5/10");
}

#[tokio::test]
async fn test_gif_task_uploads_encoded_gif() {
    let server = media_server().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/upload/.+"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/clip.gif", server.uri()),
            "face_url": format!("{}/face.png", server.uri()),
            "enhance": 1
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Done));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].result["file_url"]
        .as_str()
        .unwrap()
        .ends_with("media_out.gif"));

    // Two progress steps (swap + enhance); the enhance pass starts at 50%.
    let progress = api.progress.lock().unwrap().clone();
    assert!(progress.iter().any(|p| p.progress == 25));
    assert!(progress.iter().any(|p| p.progress == 75));
}

#[tokio::test]
async fn test_progress_failures_do_not_stop_the_task() {
    let server = media_server().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/upload/.+"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::rejecting_progress(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [
                {"to_face": format!("{}/face.png", server.uri())},
                {"from_face": format!("{}/face.png", server.uri()), "to_face": format!("{}/face.png", server.uri())}
            ]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Done));
    assert!(api.progress.lock().unwrap().is_empty());
    assert_eq!(api.updates()[0].state, 3);
}

#[tokio::test]
async fn test_missing_media_url_fails_without_downloads() {
    let server = MockServer::start().await;
    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(
        Some(task(json!({
            "swap_list": [{"to_face": "https://faces.example.com/a.png"}]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Failed));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, -1);
    assert_eq!(updates[0].process, 99);
    assert_eq!(updates[0].log, "Missing media URL");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_null_params_task_is_failed_once() {
    let server = MockServer::start().await;
    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(Some(task(serde_json::Value::Null)), &server.uri());
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Failed));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, -1);
    assert_eq!(updates[0].log, "Missing media URL");
}

#[tokio::test]
async fn test_swap_entry_without_face_fails_before_processing() {
    let server = media_server().await;
    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [
                {"from_face": format!("{}/face.png", server.uri())},
                {"to_face": format!("{}/face.png", server.uri())}
            ]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Failed));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].log, "Missing face in swap list");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_conversion_fails_task_once() {
    let server = media_server().await;
    let h = harness("exit 1");
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [{"to_face": format!("{}/face.png", server.uri())}]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Failed));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, -1);
    assert!(updates[0].log.starts_with("convert failed"));
}

#[tokio::test]
async fn test_rejected_upload_fails_task() {
    let server = media_server().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/upload/.+"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(WRITE_LAST_ARG);
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [{"to_face": format!("{}/face.png", server.uri())}]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Processed(TaskPhase::Failed));

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].log.starts_with("Upload failed"));
}

#[tokio::test]
async fn test_empty_queue_is_idle_and_cleans_workspace() {
    let server = MockServer::start().await;
    let h = harness(WRITE_LAST_ARG);
    std::fs::write(h.config.work_dir.join("media_temp_1.mp4"), b"stale").unwrap();
    let api = RecordingApi::new(None, &server.uri());
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_eq!(executor.run_once().await, PollOutcome::Idle);
    assert!(api.updates().is_empty());
    assert!(!h.config.work_dir.join("media_temp_1.mp4").exists());

    let fetches = api.fetches.lock().unwrap().clone();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].term, "cuda");
}

#[tokio::test]
async fn test_one_shot_run_returns_after_first_task() {
    let server = media_server().await;
    Mock::given(method("PUT"))
        .and(path_regex("^/upload/.+"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut h = harness(WRITE_LAST_ARG);
    h.config.one_shot = true;
    let api = RecordingApi::new(
        Some(task(json!({
            "media_url": format!("{}/media.mp4", server.uri()),
            "swap_list": [{"to_face": format!("{}/face.png", server.uri())}]
        }))),
        &server.uri(),
    );
    let executor = TaskExecutor::new(h.config.clone(), api.clone()).unwrap();

    assert_ok!(executor.run().await);
    assert_eq!(api.updates().len(), 1);
}
