//! FaceFusion headless command builder.

use std::path::{Path, PathBuf};

use fswap_models::FaceSelectorMode;

use crate::command::Invocation;

/// Face-swapper model used when `model_id` is absent or unknown.
pub const DEFAULT_SWAPPER_MODEL: &str = "inswapper_128";

/// Map a task `model_id` to a FaceFusion face-swapper model name.
pub fn swapper_model(model_id: Option<i64>) -> &'static str {
    match model_id {
        Some(1) => "inswapper_128",
        Some(2) => "blendswap_256",
        Some(3) => "inswapper_128_fp16",
        Some(4) => "simswap_256",
        Some(5) => "simswap_512_unofficial",
        _ => DEFAULT_SWAPPER_MODEL,
    }
}

/// Frame processor run by one FaceFusion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProcessor {
    FaceSwapper,
    FaceEnhancer,
}

impl FrameProcessor {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameProcessor::FaceSwapper => "face_swapper",
            FrameProcessor::FaceEnhancer => "face_enhancer",
        }
    }
}

/// Builder for one `run.py --headless` invocation.
#[derive(Debug, Clone)]
pub struct FaceFusionCommand {
    python: String,
    script: PathBuf,
    source: PathBuf,
    target: PathBuf,
    output: PathBuf,
    execution_provider: String,
    thread_count: u32,
    queue_count: u32,
    video_output: bool,
    selector: FaceSelectorMode,
    swapper_model: Option<String>,
    processors: Vec<FrameProcessor>,
}

impl FaceFusionCommand {
    /// Swap faces from `source` onto `target`, writing `output`.
    pub fn new(source: impl AsRef<Path>, target: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            python: "python".to_string(),
            script: PathBuf::from("run.py"),
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            execution_provider: "cuda".to_string(),
            thread_count: 32,
            queue_count: 2,
            video_output: true,
            selector: FaceSelectorMode::Many,
            swapper_model: None,
            processors: vec![FrameProcessor::FaceSwapper],
        }
    }

    /// Python interpreter and entry script.
    pub fn runtime(mut self, python: impl Into<String>, script: impl AsRef<Path>) -> Self {
        self.python = python.into();
        self.script = script.as_ref().to_path_buf();
        self
    }

    /// `cpu` or `cuda`.
    pub fn execution_provider(mut self, provider: impl Into<String>) -> Self {
        self.execution_provider = provider.into();
        self
    }

    pub fn threads(mut self, thread_count: u32, queue_count: u32) -> Self {
        self.thread_count = thread_count;
        self.queue_count = queue_count;
        self
    }

    /// Whether the target is a video; image targets get no encoder options.
    pub fn video_output(mut self, video: bool) -> Self {
        self.video_output = video;
        self
    }

    pub fn selector(mut self, selector: FaceSelectorMode) -> Self {
        self.selector = selector;
        self
    }

    pub fn swapper_model(mut self, model: impl Into<String>) -> Self {
        self.swapper_model = Some(model.into());
        self
    }

    pub fn processors(mut self, processors: Vec<FrameProcessor>) -> Self {
        self.processors = processors;
        self
    }

    /// Build the command arguments (after the interpreter).
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            self.script.to_string_lossy().to_string(),
            "-s".to_string(),
            self.source.to_string_lossy().to_string(),
            "-t".to_string(),
            self.target.to_string_lossy().to_string(),
            "-o".to_string(),
            self.output.to_string_lossy().to_string(),
            "--execution-providers".to_string(),
            self.execution_provider.clone(),
            "--headless".to_string(),
            "--face-mask-types".to_string(),
            "occlusion".to_string(),
            "--execution-thread-count".to_string(),
            self.thread_count.to_string(),
            "--execution-queue-count".to_string(),
            self.queue_count.to_string(),
            "--video-memory-strategy".to_string(),
            "tolerant".to_string(),
            "--temp-frame-format".to_string(),
            "jpg".to_string(),
        ];

        if self.video_output {
            args.extend(
                [
                    "--output-video-fps",
                    "24",
                    "--output-video-quality",
                    "70",
                    "--output-video-preset",
                    "ultrafast",
                ]
                .map(String::from),
            );
        }

        args.extend(["--face-detector-score", "0.25"].map(String::from));

        match self.selector {
            FaceSelectorMode::Reference => args.extend(
                [
                    "--face-selector-mode",
                    "reference",
                    "--reference-frame-number",
                    "0",
                    "--reference-face-distance",
                    "0.8",
                    "--reference-face-position",
                    "0",
                ]
                .map(String::from),
            ),
            FaceSelectorMode::Many => args.extend(
                [
                    "--face-selector-mode",
                    "many",
                    "--face-analyser-order",
                    "best-worst",
                ]
                .map(String::from),
            ),
        }

        if let Some(model) = &self.swapper_model {
            if self.processors.contains(&FrameProcessor::FaceSwapper) {
                args.push("--face-swapper-model".to_string());
                args.push(model.clone());
            }
        }

        args.push("--frame-processors".to_string());
        args.extend(self.processors.iter().map(|p| p.as_str().to_string()));

        args
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn into_invocation(self) -> Invocation {
        Invocation::new(self.python.clone()).args(self.build_args())
    }
}
