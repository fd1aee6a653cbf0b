use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    composite::flatten_to_opaque_rgba8,
    core::{Fps, Frame, PixelBuffer, Pts},
    error::{FramewrightError, FramewrightResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VideoCodec {
    H264,
    Vp9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Container {
    Mp4,
    Matroska,
    WebM,
}

impl Container {
    fn ffmpeg_format(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Matroska => "matroska",
            Self::WebM => "webm",
        }
    }

    fn supports(self, codec: VideoCodec) -> bool {
        match self {
            Self::Mp4 => matches!(codec, VideoCodec::H264),
            Self::Matroska => true,
            Self::WebM => matches!(codec, VideoCodec::Vp9),
        }
    }

    fn audio_codec(self) -> &'static str {
        match self {
            Self::Mp4 | Self::Matroska => "aac",
            Self::WebM => "libopus",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Quality {
    /// Constant rate factor (lower is better quality).
    Crf(u8),
    /// Target average bitrate.
    BitrateKbps(u32),
}

/// An already-resolved audio track on disk, muxed in by ffmpeg.
#[derive(Clone, Debug)]
pub struct AudioInput {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub codec: VideoCodec,
    pub container: Container,
    pub quality: Quality,
    /// Keyframe interval in frames. `None` leaves the encoder default.
    pub gop: Option<u32>,
    pub out_path: PathBuf,
    pub overwrite: bool,
    /// Background color used to flatten alpha (straight RGBA8).
    pub bg_rgba: [u8; 4],
    pub audio: Option<AudioInput>,
}

impl EncodeConfig {
    pub fn validate(&self) -> FramewrightResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FramewrightError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(FramewrightError::validation("encode fps must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // All supported outputs target yuv420p for maximum compatibility.
            return Err(FramewrightError::validation(
                "encode width/height must be even (required for yuv420p output)",
            ));
        }
        if !self.container.supports(self.codec) {
            return Err(FramewrightError::validation(format!(
                "container {:?} does not support codec {:?}",
                self.container, self.codec
            )));
        }
        match self.quality {
            Quality::Crf(crf) => {
                let max = match self.codec {
                    VideoCodec::H264 => 51,
                    VideoCodec::Vp9 => 63,
                };
                if crf > max {
                    return Err(FramewrightError::validation(format!(
                        "crf {crf} out of range for {:?} (max {max})",
                        self.codec
                    )));
                }
            }
            Quality::BitrateKbps(kbps) => {
                if kbps == 0 {
                    return Err(FramewrightError::validation("bitrate must be > 0 kbps"));
                }
            }
        }
        if let Some(gop) = self.gop
            && gop == 0
        {
            return Err(FramewrightError::validation("gop must be > 0 frames"));
        }
        Ok(())
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> FramewrightResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Streams raw frames into the system `ffmpeg` binary, which performs the
/// colorspace conversion (rgba -> yuv420p), codec compression, and container
/// muxing stages.
///
/// The system binary is used instead of linking libav so the crate needs no
/// native dev headers. Closing stdin makes ffmpeg flush and finalize the
/// container, so [`finish`](Self::finish) must run on both the success and the
/// error exit path; the pipeline controller guarantees that.
pub struct FfmpegEncoder {
    cfg: EncodeConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    scratch: Vec<u8>,
    last_pts: Option<Pts>,
    frames_written: u64,
}

impl FfmpegEncoder {
    pub fn new(cfg: EncodeConfig) -> FramewrightResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(FramewrightError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(FramewrightError::encoding(
                "ffmpeg is required for encoding, but was not found on PATH",
            ));
        }

        if let Some(audio) = cfg.audio.as_ref()
            && !audio.path.exists()
        {
            return Err(FramewrightError::resource_missing(format!(
                "audio input '{}' does not exist",
                audio.path.display()
            )));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if cfg.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        // Input 0: raw rgba frames over stdin, already flattened to opaque.
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
        ]);

        if let Some(audio) = cfg.audio.as_ref() {
            cmd.arg("-i").arg(&audio.path);
        }

        match cfg.codec {
            VideoCodec::H264 => {
                cmd.args(["-c:v", "libx264"]);
            }
            VideoCodec::Vp9 => {
                cmd.args(["-c:v", "libvpx-vp9"]);
            }
        }
        cmd.args(["-pix_fmt", "yuv420p"]);

        match cfg.quality {
            Quality::Crf(crf) => {
                cmd.args(["-crf", &crf.to_string()]);
                if matches!(cfg.codec, VideoCodec::Vp9) {
                    // vp9 constant-quality mode needs an explicit zero bitrate.
                    cmd.args(["-b:v", "0"]);
                }
            }
            Quality::BitrateKbps(kbps) => {
                cmd.args(["-b:v", &format!("{kbps}k")]);
            }
        }

        if let Some(gop) = cfg.gop {
            cmd.args(["-g", &gop.to_string()]);
        }

        if cfg.audio.is_some() {
            cmd.args(["-c:a", cfg.container.audio_codec(), "-shortest"]);
        } else {
            cmd.arg("-an");
        }

        if matches!(cfg.container, Container::Mp4) {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.args(["-f", cfg.container.ffmpeg_format()]);
        cmd.arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            FramewrightError::encoding(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FramewrightError::encoding("failed to open ffmpeg stdin"))?;

        // Drain stderr on a side thread so ffmpeg cannot block on a full pipe.
        let stderr_drain = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).map(|_| buf)
            })
        });

        tracing::debug!(
            out = %cfg.out_path.display(),
            codec = ?cfg.codec,
            container = ?cfg.container,
            "ffmpeg encoder started"
        );

        Ok(Self {
            // usize arithmetic: width * height * 4 can exceed u32 at large
            // (still validation-passing) resolutions.
            scratch: vec![0u8; PixelBuffer::byte_len_for(cfg.width, cfg.height)],
            cfg,
            child,
            stdin: Some(stdin),
            stderr_drain,
            last_pts: None,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn encode_frame(&mut self, frame: &Frame) -> FramewrightResult<()> {
        if frame.buffer.width != self.cfg.width || frame.buffer.height != self.cfg.height {
            return Err(FramewrightError::validation(format!(
                "frame {} size mismatch: got {}x{}, expected {}x{}",
                frame.index,
                frame.buffer.width,
                frame.buffer.height,
                self.cfg.width,
                self.cfg.height
            )));
        }
        if frame.buffer.data.len() != self.scratch.len() {
            return Err(FramewrightError::validation(
                "frame data size mismatch with width*height*4",
            ));
        }

        if let Some(last) = self.last_pts
            && frame.pts <= last
        {
            return Err(FramewrightError::ordering(format!(
                "frame {} pts {:?} is not after previous pts {:?}",
                frame.index, frame.pts, last
            )));
        }
        self.last_pts = Some(frame.pts);

        if frame.buffer.premultiplied {
            flatten_to_opaque_rgba8(&mut self.scratch, &frame.buffer.data, self.cfg.bg_rgba)?;
        } else {
            self.scratch.copy_from_slice(&frame.buffer.data);
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(FramewrightError::encoding(
                "ffmpeg encoder is already finalized",
            ));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            FramewrightError::encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        self.frames_written += 1;

        Ok(())
    }

    /// Close the input stream and wait for ffmpeg to write trailing container
    /// metadata. Must run even when frame production stopped early: closing
    /// stdin is what makes ffmpeg finalize rather than truncate the artifact.
    pub fn finish(mut self) -> FramewrightResult<PathBuf> {
        drop(self.stdin.take());

        let status = self.child.wait().map_err(|e| {
            FramewrightError::encoding(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;

        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FramewrightError::encoding("ffmpeg stderr drain thread panicked"))?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(FramewrightError::encoding(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }

        tracing::debug!(
            out = %self.cfg.out_path.display(),
            frames = self.frames_written,
            "ffmpeg encoder finalized"
        );
        Ok(self.cfg.out_path.clone())
    }
}
