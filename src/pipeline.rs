use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    core::{Affine, Frame},
    encode::{AudioInput, FfmpegEncoder},
    error::{FramewrightError, FramewrightResult},
    job::RenderJob,
    raster::{RasterSettings, Rasterizer},
    resource::ResourceLoader,
    sched::FrameScheduler,
};

/// Default bound on the ready-but-unencoded frame queue. A tuning knob, not a
/// correctness concern; the producer blocks once this many frames are queued.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Rendering,
    Encoding,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Rendering => write!(f, "rendering"),
            Self::Encoding => write!(f, "encoding"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Rendering,
    Encoding,
    Done,
    Failed,
}

/// Structured failure surfaced to the caller: which stage broke, why, and how
/// far the job got. Retry policy belongs to the caller, not here.
#[derive(Debug)]
pub struct FailureReport {
    pub stage: Stage,
    pub cause: FramewrightError,
    /// Frames already handed to the encoder when the job stopped.
    pub frames_completed: u64,
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job failed during {} after {} frames: {}",
            self.stage, self.frames_completed, self.cause
        )
    }
}

impl std::error::Error for FailureReport {}

/// Successful job outcome.
#[derive(Debug)]
pub struct JobReport {
    pub artifact: PathBuf,
    pub frames_encoded: u64,
}

/// Cooperative cancellation handle. Cloneable; any clone cancels the job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Owns one [`RenderJob`] end to end.
///
/// The producer (frame scheduler + rasterizer) runs on its own thread; the
/// consumer (encoder) runs on the caller's thread. A bounded channel between
/// them is the pipeline's only suspension point: the producer blocks when the
/// consumer falls behind, which is what bounds memory use.
///
/// Each run builds its own rasterizer and encoder; nothing mutable is shared
/// across concurrent jobs.
pub struct PipelineController {
    queue_capacity: usize,
    cancel: CancelToken,
    state: JobState,
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineController {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            cancel: CancelToken::new(),
            state: JobState::Pending,
        }
    }

    /// Handle the caller keeps to cancel the running job.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the job to completion. Blocking; a caller wanting a wall-clock
    /// timeout wraps this call and uses the cancel token.
    pub fn run(
        &mut self,
        job: RenderJob,
        loader: Arc<dyn ResourceLoader>,
    ) -> Result<JobReport, FailureReport> {
        debug_assert_eq!(self.state, JobState::Pending);

        if let Err(cause) = job.validate() {
            self.state = JobState::Failed;
            return Err(FailureReport {
                stage: Stage::Validation,
                cause,
                frames_completed: 0,
            });
        }

        // Resolve the audio reference up front; a missing track should fail
        // before a single frame is rendered.
        let mut audio_tmp = TempFileGuard(None);
        let audio = match stage_audio(&job, loader.as_ref(), &mut audio_tmp) {
            Ok(audio) => audio,
            Err(cause) => {
                self.state = JobState::Failed;
                return Err(FailureReport {
                    stage: Stage::Validation,
                    cause,
                    frames_completed: 0,
                });
            }
        };

        let encoder = match FfmpegEncoder::new(job.encode_config(audio)) {
            Ok(enc) => enc,
            Err(cause) => {
                self.state = JobState::Failed;
                return Err(FailureReport {
                    stage: Stage::Encoding,
                    cause,
                    frames_completed: 0,
                });
            }
        };

        self.state = JobState::Rendering;
        tracing::info!(out = %job.output.out_path.display(), "render job started");

        let outcome = self.run_pipeline(&job, loader, encoder);
        drop(audio_tmp);

        match outcome {
            Ok(report) => {
                self.state = JobState::Done;
                tracing::info!(
                    artifact = %report.artifact.display(),
                    frames = report.frames_encoded,
                    "render job done"
                );
                Ok(report)
            }
            Err(report) => {
                self.state = JobState::Failed;
                tracing::warn!(stage = %report.stage, cause = %report.cause, "render job failed");
                Err(report)
            }
        }
    }

    fn run_pipeline(
        &mut self,
        job: &RenderJob,
        loader: Arc<dyn ResourceLoader>,
        mut encoder: FfmpegEncoder,
    ) -> Result<JobReport, FailureReport> {
        let (tx, rx) = crossbeam_channel::bounded::<FramewrightResult<Frame>>(self.queue_capacity);

        let scene = job.scene.clone();
        let fps = job.resolved_fps();
        let canvas = job.output_canvas();
        let settings = RasterSettings {
            background: Some(job.output.background),
            root: scale_to_output(job),
        };
        let cancel = self.cancel.clone();

        let producer = std::thread::spawn(move || {
            let mut rasterizer = Rasterizer::new(settings, loader);
            let sched = FrameScheduler::new(&scene, &mut rasterizer, fps, canvas);
            for item in sched {
                if cancel.is_cancelled() {
                    let _ = tx.send(Err(FramewrightError::Cancelled));
                    return;
                }
                let stop = item.is_err();
                // A send error means the consumer is gone; stop rendering.
                if tx.send(item).is_err() || stop {
                    return;
                }
            }
        });

        let mut failure: Option<(Stage, FramewrightError)> = None;
        let mut encoding = false;
        for item in rx.iter() {
            match item {
                Ok(frame) => {
                    if !encoding {
                        // Streaming handoff: encoding starts with the first
                        // frame, while later frames are still being rendered.
                        encoding = true;
                        self.state = JobState::Encoding;
                        tracing::debug!("first frame ready, encoding started");
                    }
                    if let Err(cause) = encoder.encode_frame(&frame) {
                        failure = Some((Stage::Encoding, cause));
                        break;
                    }
                }
                Err(cause) => {
                    failure = Some((Stage::Rendering, cause));
                    break;
                }
            }
        }
        // Disconnect so a producer blocked on a full queue can exit.
        drop(rx);

        let frames_completed = encoder.frames_written();
        // Finalize on every exit path: even a failed or cancelled job leaves a
        // structurally valid container behind, never a truncated one.
        let finish = encoder.finish();

        if producer.join().is_err() {
            failure.get_or_insert((
                Stage::Rendering,
                FramewrightError::ordering("frame producer thread panicked"),
            ));
        }

        match (failure, finish) {
            (None, Ok(artifact)) => Ok(JobReport {
                artifact,
                frames_encoded: frames_completed,
            }),
            (None, Err(cause)) => Err(FailureReport {
                stage: Stage::Encoding,
                cause,
                frames_completed,
            }),
            (Some((stage, cause)), finish) => {
                if let Err(finish_err) = finish {
                    tracing::warn!(error = %finish_err, "finalize after failure also failed");
                }
                Err(FailureReport {
                    stage,
                    cause,
                    frames_completed,
                })
            }
        }
    }
}

fn stage_audio(
    job: &RenderJob,
    loader: &dyn ResourceLoader,
    guard: &mut TempFileGuard,
) -> FramewrightResult<Option<AudioInput>> {
    let Some(id) = job.output.audio.as_deref() else {
        return Ok(None);
    };

    let bytes = loader
        .resolve(id)
        .map_err(|e| FramewrightError::resource_missing(format!("audio {e}")))?;

    let path = std::env::temp_dir().join(format!(
        "framewright_audio_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    ));
    use anyhow::Context as _;
    std::fs::write(&path, bytes)
        .with_context(|| format!("stage audio track to '{}'", path.display()))?;
    guard.0 = Some(path.clone());

    Ok(Some(AudioInput { path }))
}

/// Root transform mapping scene coordinates onto the output resolution.
fn scale_to_output(job: &RenderJob) -> Affine {
    let sx = f64::from(job.output.width) / f64::from(job.scene.canvas.width);
    let sy = f64::from(job.output.height) / f64::from(job.scene.canvas.height);
    if sx == 1.0 && sy == 1.0 {
        Affine::IDENTITY
    } else {
        Affine::scale_non_uniform(sx, sy)
    }
}

struct TempFileGuard(Option<PathBuf>);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
