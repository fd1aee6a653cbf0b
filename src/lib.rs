//! Server-side media composition pipeline.
//!
//! Given a declarative [`Scene`] (text, vector, and image layers on a
//! timeline) and a [`RenderJob`] describing the output, the
//! [`PipelineController`] rasterizes frames on the CPU and streams them into
//! ffmpeg to produce a playable container file. Rendering and encoding run
//! concurrently over a bounded queue, so memory stays flat regardless of
//! scene length.

#![forbid(unsafe_code)]

pub mod composite;
pub mod core;
pub mod encode;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod raster;
pub mod resource;
pub mod sched;
pub mod scene;

pub use crate::core::{
    Affine, BezPath, Canvas, Fps, Frame, PixelBuffer, Point, Pts, Rect, Rgba8, TimeBase,
    TimeRange, Transform2D, Vec2,
};
pub use encode::{
    AudioInput, Container, EncodeConfig, FfmpegEncoder, Quality, VideoCodec, is_ffmpeg_on_path,
};
pub use error::{FramewrightError, FramewrightResult};
pub use job::{OutputParams, RenderJob};
pub use pipeline::{
    CancelToken, DEFAULT_QUEUE_CAPACITY, FailureReport, JobReport, JobState, PipelineController,
    Stage,
};
pub use raster::{RasterSettings, Rasterizer};
pub use resource::{FsResourceLoader, MemoryResourceLoader, ResourceLoader};
pub use sched::FrameScheduler;
pub use scene::{
    FitPolicy, ImageLayer, Layer, LayerContent, Scene, StrokeStyle, TextAlign, TextLayer,
    VectorLayer,
};
