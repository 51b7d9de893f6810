//! Per-task pipeline.
//!
//! A task moves through `Pending → Downloading → Preprocessing →
//! FaceSwap(0..n) → [Enhancing] → Thumbnailing → Uploading → Reporting`,
//! ending in `Done` or `Failed`. Every fatal error short-circuits to `Failed`,
//! which sends exactly one failure update upstream. Stages are planned from the
//! task parameters up front; the output of one stage feeds the next.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fswap_media::fs_utils::{copy_file, file_ready, remove_if_exists};
use fswap_media::{
    add_border, convert_video, gif_encode, gif_palette, gif_to_video, image_thumbnail,
    is_animated_webp, swapper_model, video_thumbnail, watermark_image, webp_to_gif, CutRange,
    FaceFusionCommand, FrameProcessor, Invocation, ProcessSupervisor,
};
use fswap_models::{
    FaceSelectorMode, MediaKind, MediaResult, PipelineStage, StageKind, SwapPair, Task, TaskPhase,
    TaskStateUpdate,
};
use fswap_queue::{QueueError, TaskApi};
use fswap_storage::{download_file_with_idle_timeout, UploadSupervisor};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::metrics;
use crate::progress::{spawn_forwarder, ProgressReporter, StepProgressAggregator};
use crate::retry::{retry_async, RetryConfig};
use crate::workspace::TaskWorkspace;

/// Plan the ordered stage chain of one task.
///
/// `source` is the normalisation input (the download, or the GIF produced
/// from an animated WebP).
pub fn plan_stages(
    workspace: &TaskWorkspace,
    source: &Path,
    kind: MediaKind,
    pairs: &[SwapPair],
    enhance: bool,
) -> Vec<PipelineStage> {
    let mut stages = Vec::with_capacity(pairs.len() + 4);

    let media = workspace.media(kind);
    stages.push(PipelineStage::new(StageKind::Convert, source, &media));

    let swapped = workspace.swapped(kind);
    let mut current = media;
    for (index, pair) in pairs.iter().enumerate() {
        let is_last = index + 1 == pairs.len();
        let output = if is_last && !enhance {
            swapped.clone()
        } else {
            workspace.swap_output(index + 1, kind)
        };
        let selector = if pair.uses_reference() {
            FaceSelectorMode::Reference
        } else {
            FaceSelectorMode::Many
        };
        stages.push(
            PipelineStage::new(StageKind::FaceSwap { index }, &current, &output)
                .with_selector(selector),
        );
        current = output;
    }

    if enhance {
        stages.push(PipelineStage::new(StageKind::Enhance, &current, &swapped));
    }

    stages.push(PipelineStage::new(StageKind::Thumbnail, &swapped, workspace.thumbnail()).non_fatal());

    if kind == MediaKind::Gif {
        stages.push(PipelineStage::new(StageKind::GifEncode, &swapped, workspace.result(kind)));
    }

    stages
}

/// File name requested from the signing endpoint for an artifact.
pub fn upload_name(task: &Task, path: &Path) -> String {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    format!("{}_{}_{}", task.id, chrono::Utc::now().timestamp_millis(), file_name)
}

/// Runs tasks end to end inside one work directory.
pub struct TaskPipeline {
    config: Arc<WorkerConfig>,
    api: Arc<dyn TaskApi>,
    http: Client,
    supervisor: ProcessSupervisor,
    uploader: UploadSupervisor,
    workspace: TaskWorkspace,
}

/// Per-task progress plumbing shared by the inference stages.
struct ProgressChannel {
    aggregator: Arc<StepProgressAggregator>,
    reporter: Arc<ProgressReporter>,
}

impl TaskPipeline {
    pub fn new(config: Arc<WorkerConfig>, api: Arc<dyn TaskApi>, http: Client) -> Self {
        let supervisor = ProcessSupervisor::new(config.supervisor.clone());
        let uploader = UploadSupervisor::new(http.clone(), config.upload.clone());
        let workspace = TaskWorkspace::new(&config.work_dir);
        Self {
            config,
            api,
            http,
            supervisor,
            uploader,
            workspace,
        }
    }

    pub fn workspace(&self) -> &TaskWorkspace {
        &self.workspace
    }

    /// Run `task` to a terminal phase.
    ///
    /// Exactly one terminal state update is attempted. Failing to deliver it
    /// is logged; the queue redelivers the task once its lease expires.
    pub async fn run(&self, task: &Task) -> TaskPhase {
        let logger = TaskLogger::new(&task.id, "face_swap");
        let span = logger.create_span();
        self.run_logged(task, &logger).instrument(span).await
    }

    async fn run_logged(&self, task: &Task, logger: &TaskLogger) -> TaskPhase {
        let started = Instant::now();
        let kind = task.params.media_kind();
        logger.log_start(&format!(
            "{} with {} swap pass(es)",
            kind.as_str(),
            task.params.swap_pairs().len()
        ));

        match self.execute(task, logger).await {
            Ok(result) => {
                enter(logger, TaskPhase::Reporting);
                let update = TaskStateUpdate::success(task.id.clone(), &result);
                match self.api.update_state(&update).await {
                    Ok(()) => {
                        metrics::record_task_completed(kind.as_str(), started.elapsed().as_secs_f64());
                        logger.log_completion(&format!(
                            "{} in {:.1}s",
                            result.file_url,
                            started.elapsed().as_secs_f64()
                        ));
                        TaskPhase::Done
                    }
                    Err(e) => {
                        metrics::record_task_failed(kind.as_str());
                        logger.log_error(&format!("Failed to report completion: {}", e));
                        TaskPhase::Failed
                    }
                }
            }
            Err(e) => {
                metrics::record_task_failed(kind.as_str());
                logger.log_error(&e.to_string());
                self.report_failure(task, logger, &e).await;
                TaskPhase::Failed
            }
        }
    }

    async fn report_failure(&self, task: &Task, logger: &TaskLogger, error: &WorkerError) {
        let update = TaskStateUpdate::failure(task.id.clone(), Value::Null, error.to_string());
        if let Err(e) = self.api.update_state(&update).await {
            logger.log_error(&format!("Failed to report failure: {}", e));
        }
    }

    async fn execute(&self, task: &Task, logger: &TaskLogger) -> WorkerResult<MediaResult> {
        let params = &task.params;
        params.validate()?;
        let pairs = params.swap_pairs();

        enter(logger, TaskPhase::Downloading);
        let extension = params.media_extension();
        let input = self.workspace.input(&extension);
        self.fetch(&params.media_url, &input).await?;

        enter(logger, TaskPhase::Preprocessing);
        if params.nsfw_check {
            self.workspace.write_nsfw_marker().await?;
        }

        let mut kind = params.media_kind();
        let mut source = input.clone();
        if extension == ".webp" && is_animated_webp(&input).await? {
            let gif = self.workspace.input_gif();
            let stage = PipelineStage::new(StageKind::Convert, &input, &gif);
            self.run_stage(&stage, webp_to_gif(&self.config.convert_program, &input, &gif), None)
                .await?;
            source = gif;
            if params.media_type.trim().is_empty() {
                kind = MediaKind::Gif;
            }
            debug!("Animated WebP converted, processing as {}", kind.as_str());
        }

        let stages = plan_stages(&self.workspace, &source, kind, &pairs, params.enhance);
        let progress = ProgressChannel {
            aggregator: Arc::new(StepProgressAggregator::new(
                stages.iter().filter(|s| s.kind.is_progress_step()).count(),
            )),
            reporter: Arc::new(ProgressReporter::new(
                Arc::clone(&self.api),
                task.id.clone(),
                self.config.progress_interval,
            )),
        };

        let mut thumbnail_ready = false;
        let mut last_face: Option<PathBuf> = None;
        for stage in &stages {
            match stage.kind {
                StageKind::Convert => {
                    self.run_stage(stage, self.convert_invocation(stage, kind, task), None)
                        .await?;
                }
                StageKind::FaceSwap { index } => {
                    enter(logger, TaskPhase::FaceSwap(index));
                    progress.aggregator.set_step(index);
                    let face = self.prepare_faces(&pairs[index], index).await?;
                    let invocation = self.facefusion(
                        &face,
                        stage,
                        kind,
                        task,
                        vec![FrameProcessor::FaceSwapper],
                    );
                    self.run_stage(stage, invocation, Some(&progress)).await?;
                    last_face = Some(face);
                }
                StageKind::Enhance => {
                    enter(logger, TaskPhase::Enhancing);
                    progress.aggregator.set_step(pairs.len());
                    let face = last_face
                        .clone()
                        .unwrap_or_else(|| self.workspace.bordered_face());
                    let invocation = self.facefusion(
                        &face,
                        stage,
                        kind,
                        task,
                        vec![FrameProcessor::FaceEnhancer],
                    );
                    self.run_stage(stage, invocation, Some(&progress)).await?;
                }
                StageKind::Thumbnail => {
                    enter(logger, TaskPhase::Thumbnailing);
                    let cmd = match kind {
                        MediaKind::Image => image_thumbnail(&stage.input, &stage.output),
                        MediaKind::Video | MediaKind::Gif => {
                            video_thumbnail(&stage.input, &stage.output)
                        }
                    };
                    thumbnail_ready = self
                        .run_stage(stage, cmd.into_invocation(&self.config.ffmpeg_program), None)
                        .await?;
                    if !thumbnail_ready {
                        logger.log_warning("Thumbnail generation failed, continuing without it");
                    }
                }
                StageKind::GifEncode => {
                    let palette = self.workspace.palette();
                    let palette_stage = PipelineStage::new(StageKind::GifEncode, &stage.input, &palette);
                    self.run_stage(
                        &palette_stage,
                        gif_palette(&stage.input, &palette).into_invocation(&self.config.ffmpeg_program),
                        None,
                    )
                    .await?;
                    self.run_stage(
                        stage,
                        gif_encode(&stage.input, &palette, &stage.output)
                            .into_invocation(&self.config.ffmpeg_program),
                        None,
                    )
                    .await?;
                }
            }
        }

        let artifact = self.workspace.result(kind);
        if !file_ready(&artifact).await {
            return Err(WorkerError::ArtifactMissing(artifact));
        }

        enter(logger, TaskPhase::Uploading);
        let file_url = self.publish(task, &artifact).await?;
        let thumb_url = if thumbnail_ready {
            match self.publish(task, &self.workspace.thumbnail()).await {
                Ok(url) => Some(url),
                Err(e) => {
                    logger.log_warning(&format!("Thumbnail upload failed: {}", e));
                    None
                }
            }
        } else {
            None
        };

        Ok(MediaResult {
            user_id: task.user_id.clone(),
            media_id: params.media_id.clone(),
            file_url,
            thumb_url,
            file_hash: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        })
    }

    /// Run one stage under the supervisor.
    ///
    /// Returns whether the stage produced its output. Fatal stages turn a
    /// failed exit or a missing output into an error instead.
    async fn run_stage(
        &self,
        stage: &PipelineStage,
        invocation: Invocation,
        progress: Option<&ProgressChannel>,
    ) -> WorkerResult<bool> {
        let invocation = invocation.current_dir(self.workspace.dir());
        debug!(stage = %stage.kind, "Running {}", invocation.command_line());

        let started = Instant::now();
        let outcome = match progress {
            Some(progress) => {
                let (tx, rx) = mpsc::channel(self.config.supervisor.line_capacity);
                let forwarder = spawn_forwarder(
                    rx,
                    Arc::clone(&progress.aggregator),
                    Arc::clone(&progress.reporter),
                );
                let outcome = self.supervisor.run_with_sink(&invocation, Some(tx)).await;
                if let Err(e) = forwarder.await {
                    debug!("Progress forwarder ended abnormally: {}", e);
                }
                outcome
            }
            None => self.supervisor.run(&invocation).await,
        };
        metrics::record_stage(
            stage.kind.label(),
            started.elapsed().as_secs_f64(),
            outcome.is_success(),
        );

        if !outcome.is_success() {
            if stage.fatal {
                return Err(WorkerError::stage_failed(stage.kind, outcome));
            }
            return Ok(false);
        }
        if !file_ready(&stage.output).await {
            if stage.fatal {
                return Err(WorkerError::ArtifactMissing(stage.output.clone()));
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn convert_invocation(&self, stage: &PipelineStage, kind: MediaKind, task: &Task) -> Invocation {
        let params = &task.params;
        let watermark = Some(params.watermark.as_str());
        let cmd = match kind {
            MediaKind::Video => convert_video(
                &stage.input,
                &stage.output,
                Some(params.resolution),
                watermark,
                CutRange::new(Some(params.start_time), Some(params.end_time)),
            ),
            MediaKind::Gif => gif_to_video(&stage.input, &stage.output, watermark),
            MediaKind::Image => watermark_image(&stage.input, &stage.output, watermark),
        };
        cmd.into_invocation(&self.config.ffmpeg_program)
    }

    fn facefusion(
        &self,
        face: &Path,
        stage: &PipelineStage,
        kind: MediaKind,
        task: &Task,
        processors: Vec<FrameProcessor>,
    ) -> Invocation {
        let model = match task.params.model_id {
            0 => self.config.default_model.clone(),
            id => swapper_model(Some(id)).to_string(),
        };
        FaceFusionCommand::new(face, &stage.input, &stage.output)
            .runtime(&self.config.python_program, &self.config.facefusion_script)
            .execution_provider(&self.config.execution_mode)
            .threads(self.config.facefusion_threads, self.config.facefusion_queue)
            .video_output(kind != MediaKind::Image)
            .selector(stage.selector)
            .swapper_model(model)
            .processors(processors)
            .into_invocation()
    }

    /// Download the faces of pass `index` and return the bordered target face.
    ///
    /// The inference engine reads the reference face from the work directory
    /// by name, so a stale one from an earlier pass must not survive.
    async fn prepare_faces(&self, pair: &SwapPair, index: usize) -> WorkerResult<PathBuf> {
        let reference = self.workspace.reference_face();
        remove_if_exists(&reference).await?;
        if let Some(from_face) = &pair.from_face {
            self.fetch(from_face, &reference).await?;
        }

        let raw = self.workspace.to_face(index + 1);
        self.fetch(&pair.to_face, &raw).await?;

        let bordered = self.workspace.bordered_face();
        let invocation = add_border(&self.config.convert_program, &raw, &bordered)
            .current_dir(self.workspace.dir());
        let outcome = self.supervisor.run(&invocation).await;
        if !outcome.is_success() || !file_ready(&bordered).await {
            debug!("Border step failed ({}), using the face as is", outcome);
            copy_file(&raw, &bordered).await?;
        }
        Ok(bordered)
    }

    async fn fetch(&self, url: &str, path: &Path) -> WorkerResult<()> {
        let idle_timeout = self.config.download_idle_timeout;
        let bytes = download_file_with_idle_timeout(&self.http, url, path, idle_timeout)
            .await
            .map_err(|e| WorkerError::download_failed(format!("{}: {}", path.display(), e)))?;
        debug!("Downloaded {} bytes to {}", bytes, path.display());
        Ok(())
    }

    /// Sign and upload one artifact, returning its public URL.
    async fn publish(&self, task: &Task, path: &Path) -> WorkerResult<String> {
        let name = upload_name(task, path);
        let retry = RetryConfig::new("sign_upload");
        let signed = retry_async(
            &retry,
            || self.api.sign_upload(&name),
            |e: &QueueError| e.is_retryable(),
        )
        .await?;

        if !self.uploader.upload(path, &signed.url).await {
            return Err(WorkerError::upload_failed(name));
        }
        Ok(signed.pub_url)
    }
}

fn enter(logger: &TaskLogger, phase: TaskPhase) {
    logger.log_progress(&format!("entering {}", phase));
}
