//! Task definitions as handed out by the remote queue.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};
use crate::serde_utils::{lenient_flag, lenient_i64, lenient_string};

/// Extensions treated as video when the task does not state a media type.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".m4v", ".mkv", ".avi", ".mov", ".webm", ".mpeg", ".mpg", ".wmv", ".flv", ".asf",
    ".3gp", ".3g2", ".ogg", ".vob", ".rmvb", ".ts", ".m2ts", ".divx", ".xvid", ".h264", ".avc",
    ".hevc", ".vp9", ".avchd",
];

/// Extensions treated as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

/// Unique identifier of a queue task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task fetched from the queue.
///
/// Owned by exactly one worker for its lifetime; terminated by a final state
/// update (success or failure) or abandoned if the worker dies, in which case
/// the queue redelivers it after its lease expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: TaskId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default, rename = "needCredit", deserialize_with = "lenient_i64")]
    pub need_credit: i64,
    #[serde(default, deserialize_with = "lenient_params")]
    pub params: TaskParams,
}

/// One face-swap pass: replace faces with `to_face`, optionally only the face
/// matching `from_face`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPair {
    #[serde(default, deserialize_with = "optional_url")]
    pub from_face: Option<String>,
    /// Empty when the queue sent no usable target face.
    #[serde(default, deserialize_with = "lenient_string")]
    pub to_face: String,
}

impl SwapPair {
    /// Whether this pass targets a specific reference face.
    pub fn uses_reference(&self) -> bool {
        self.from_face.is_some()
    }
}

/// Task parameters. Unknown keys are retained in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_url: String,
    #[serde(default, deserialize_with = "lenient_swap_list")]
    pub swap_list: Vec<SwapPair>,
    /// Legacy single-face form: swap every face in the media with this one.
    #[serde(default, deserialize_with = "lenient_string")]
    pub face_url: String,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub media_type: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub resolution: i64,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub enhance: bool,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub end_time: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub watermark: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub nsfw_check: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_id: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub model_id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskParams {
    /// The face-swap passes to run, in order.
    ///
    /// Falls back to a single non-reference pass built from `face_url` when
    /// no swap list was given.
    pub fn swap_pairs(&self) -> Vec<SwapPair> {
        if !self.swap_list.is_empty() {
            return self.swap_list.clone();
        }
        if self.face_url.is_empty() {
            return Vec::new();
        }
        vec![SwapPair {
            from_face: None,
            to_face: self.face_url.clone(),
        }]
    }

    /// Check that the inputs required to run the pipeline are present.
    pub fn validate(&self) -> ModelResult<()> {
        if self.media_url.trim().is_empty() {
            return Err(ModelError::missing_input("Missing media URL"));
        }
        let pairs = self.swap_pairs();
        if pairs.is_empty() {
            return Err(ModelError::missing_input("Missing swap list"));
        }
        if pairs.iter().any(|pair| pair.to_face.trim().is_empty()) {
            return Err(ModelError::missing_input("Missing face in swap list"));
        }
        Ok(())
    }

    /// Whether a trim range was requested.
    pub fn has_cut(&self) -> bool {
        self.end_time > self.start_time
    }

    /// Media kind from the explicit `type`, else inferred from the URL.
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::parse(&self.media_type)
            .unwrap_or_else(|| MediaKind::from_extension(&self.media_extension()))
    }

    /// Lower-cased extension (with the leading dot) of the media URL path,
    /// defaulting to `.mp4`.
    pub fn media_extension(&self) -> String {
        url_extension(&self.media_url).unwrap_or_else(|| ".mp4".to_string())
    }
}

/// Extension (with leading dot, lower-cased) of a URL's path component.
pub fn url_extension(raw: &str) -> Option<String> {
    let path = match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
}

/// Kind of media a task operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Video,
    Gif,
    Image,
}

impl MediaKind {
    /// Parse the task's `type` parameter.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Some(MediaKind::Video),
            "gif" => Some(MediaKind::Gif),
            "image" => Some(MediaKind::Image),
            _ => None,
        }
    }

    /// Infer the kind from a file extension such as `.png`.
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if ext == ".gif" {
            MediaKind::Gif
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else {
            MediaKind::Video
        }
    }

    /// Extension of intermediate and final artifacts produced by inference.
    ///
    /// GIF input is processed as video and only re-encoded at the end.
    pub fn working_extension(&self) -> &'static str {
        match self {
            MediaKind::Video | MediaKind::Gif => ".mp4",
            MediaKind::Image => ".jpg",
        }
    }

    /// Extension of the uploaded result.
    pub fn result_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => ".mp4",
            MediaKind::Gif => ".gif",
            MediaKind::Image => ".jpg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
            MediaKind::Image => "image",
        }
    }
}

/// Lifecycle phase of a task inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    Pending,
    Downloading,
    Preprocessing,
    /// Zero-based face-swap step.
    FaceSwap(usize),
    Enhancing,
    Thumbnailing,
    Uploading,
    Reporting,
    Done,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Failed)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Pending => write!(f, "pending"),
            TaskPhase::Downloading => write!(f, "downloading"),
            TaskPhase::Preprocessing => write!(f, "preprocessing"),
            TaskPhase::FaceSwap(step) => write!(f, "face_swap[{}]", step),
            TaskPhase::Enhancing => write!(f, "enhancing"),
            TaskPhase::Thumbnailing => write!(f, "thumbnailing"),
            TaskPhase::Uploading => write!(f, "uploading"),
            TaskPhase::Reporting => write!(f, "reporting"),
            TaskPhase::Done => write!(f, "done"),
            TaskPhase::Failed => write!(f, "failed"),
        }
    }
}

fn optional_url<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = lenient_string(deserializer)?;
    Ok(if s.trim().is_empty() { None } else { Some(s) })
}

/// Treat `null` params like an empty object.
fn lenient_params<'de, D>(deserializer: D) -> Result<TaskParams, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<TaskParams>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept a swap list that may be missing, `null`, or not an array.
///
/// Every entry is kept so the pass count matches the request; a malformed
/// entry becomes a pair without a target face, which fails validation.
fn lenient_swap_list<'de, D>(deserializer: D) -> Result<Vec<SwapPair>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<SwapPair>(item).unwrap_or(SwapPair {
                from_face: None,
                to_face: String::new(),
            })
        })
        .collect())
}
