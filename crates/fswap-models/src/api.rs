//! Request and response shapes of the task API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::{OverallProgress, ProgressEvent};
use crate::task::TaskId;

/// State codes understood by the task API.
pub struct TaskOutcome;

impl TaskOutcome {
    /// Task finished and carries its result.
    pub const SUCCESS: i32 = 3;
    /// Task failed terminally.
    pub const FAILED: i32 = -1;
    /// Progress value attached to a terminal failure.
    pub const FAILURE_PROGRESS: u8 = 99;
}

/// Standard `{code, data, info}` envelope. `code == 0` means success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    pub data: Option<T>,
    #[serde(default)]
    pub info: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Diagnostic text, falling back to the code.
    pub fn info_or_code(&self) -> String {
        match &self.info {
            Some(info) if !info.is_empty() => info.clone(),
            _ => format!("code {}", self.code),
        }
    }
}

/// Body of the task fetch call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FetchTaskRequest {
    /// Shared secret / worker scope
    pub sc: String,
    /// Execution mode (`cpu` or `cuda`)
    pub mode: String,
    /// Capability term the worker asks for
    pub term: String,
}

/// Body of the task state update call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateUpdate {
    pub task_id: TaskId,
    pub state: i32,
    pub result: Value,
    pub finish: u8,
    pub log: String,
    pub process: u8,
    pub total_frame: u64,
}

impl TaskStateUpdate {
    /// Authoritative completion carrying the uploaded artifacts.
    pub fn success(task_id: TaskId, result: &MediaResult) -> Self {
        Self {
            task_id,
            state: TaskOutcome::SUCCESS,
            result: serde_json::to_value(result).unwrap_or(Value::Null),
            finish: 1,
            log: String::new(),
            process: 100,
            total_frame: 0,
        }
    }

    /// Terminal failure with a diagnostic message.
    pub fn failure(task_id: TaskId, result: Value, log: impl Into<String>) -> Self {
        Self {
            task_id,
            state: TaskOutcome::FAILED,
            result,
            finish: 1,
            log: log.into(),
            process: TaskOutcome::FAILURE_PROGRESS,
            total_frame: 0,
        }
    }
}

/// Body of the lightweight progress call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub module: String,
    pub progress: u8,
    #[serde(rename = "frameCount")]
    pub frame_count: String,
    pub fps: f64,
}

impl ProgressUpdate {
    pub fn new(event: &ProgressEvent, overall: OverallProgress) -> Self {
        Self {
            module: event.module.clone(),
            progress: overall.value(),
            frame_count: event.frame_count.clone(),
            fps: event.fps,
        }
    }
}

/// A pre-signed upload destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUpload {
    /// Write destination
    pub url: String,
    /// Public read URL
    #[serde(rename = "pubUrl")]
    pub pub_url: String,
}

/// Result payload persisted on successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResult {
    pub user_id: String,
    pub media_id: String,
    pub file_url: String,
    pub thumb_url: Option<String>,
    /// Completion timestamp, `YYYY-MM-DD HH:MM:SS`
    pub file_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parsing() {
        let env: ApiEnvelope<SignedUpload> = serde_json::from_value(json!({
            "code": 0,
            "data": {"url": "https://s3/put?sig", "pubUrl": "https://cdn/out.mp4"}
        }))
        .unwrap();
        assert!(env.is_ok());
        assert_eq!(env.data.unwrap().pub_url, "https://cdn/out.mp4");

        let env: ApiEnvelope<Value> =
            serde_json::from_value(json!({"code": 1, "info": "no task"})).unwrap();
        assert!(!env.is_ok());
        assert_eq!(env.info_or_code(), "no task");
        assert!(env.data.is_none());
    }

    #[test]
    fn test_progress_update_wire_names() {
        let event = ProgressEvent {
            module: "FACE_SWAPPER".to_string(),
            progress: "42%".to_string(),
            percent: 42,
            frame_count: "10/570".to_string(),
            fps: 23.32,
        };
        let body = serde_json::to_value(ProgressUpdate::new(&event, OverallProgress(21))).unwrap();
        assert_eq!(
            body,
            json!({"module": "FACE_SWAPPER", "progress": 21, "frameCount": "10/570", "fps": 23.32})
        );
    }

    #[test]
    fn test_failure_update() {
        let update = TaskStateUpdate::failure(TaskId::from_string("t1"), Value::Null, "Processing failed");
        assert_eq!(update.state, TaskOutcome::FAILED);
        assert_eq!(update.process, 99);
        assert_eq!(update.finish, 1);
    }
}
