use std::path::PathBuf;

use crate::{
    core::{Canvas, Fps, Rgba8},
    encode::{AudioInput, Container, EncodeConfig, Quality, VideoCodec},
    error::FramewrightResult,
    scene::Scene,
};

/// Output side of a render job. Every knob is explicit; the only inherited
/// value is the scene's frame rate when `fps` is unset.
#[derive(Clone, Debug)]
pub struct OutputParams {
    pub width: u32,
    pub height: u32,
    /// Output frame rate; `None` inherits the scene's.
    pub fps: Option<Fps>,
    pub codec: VideoCodec,
    pub container: Container,
    pub quality: Quality,
    pub gop: Option<u32>,
    pub out_path: PathBuf,
    pub overwrite: bool,
    /// Background the canvas is cleared to and alpha is flattened over.
    pub background: Rgba8,
    /// Optional audio track resource id, muxed into the container.
    pub audio: Option<String>,
}

/// The top-level request: a scene plus output parameters.
///
/// Jobs are consumed once by the pipeline controller and never reused; the
/// terminal outcome is an artifact path or a failure report.
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub scene: Scene,
    pub output: OutputParams,
}

impl RenderJob {
    /// Validate scene and output parameters together. Runs at submission,
    /// before any rendering.
    pub fn new(scene: Scene, output: OutputParams) -> FramewrightResult<Self> {
        let job = Self { scene, output };
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> FramewrightResult<()> {
        self.scene.validate()?;
        // Encoder-facing parameters are checked by the same code the encoder
        // itself runs, so submission-time and encode-time rules cannot drift.
        self.encode_config(None).validate()?;
        if let Some(audio) = &self.output.audio {
            crate::resource::normalize_rel_path(audio)?;
        }
        Ok(())
    }

    pub fn resolved_fps(&self) -> Fps {
        self.output.fps.unwrap_or(self.scene.fps)
    }

    pub fn output_canvas(&self) -> Canvas {
        Canvas {
            width: self.output.width,
            height: self.output.height,
        }
    }

    pub(crate) fn encode_config(&self, audio: Option<AudioInput>) -> EncodeConfig {
        EncodeConfig {
            width: self.output.width,
            height: self.output.height,
            fps: self.resolved_fps(),
            codec: self.output.codec,
            container: self.output.container,
            quality: self.output.quality,
            gop: self.output.gop,
            out_path: self.output.out_path.clone(),
            overwrite: self.output.overwrite,
            bg_rgba: [
                self.output.background.r,
                self.output.background.g,
                self.output.background.b,
                255,
            ],
            audio,
        }
    }
}
