use std::path::Path;

use crate::error::{FramewrightError, FramewrightResult};

pub use kurbo::{Affine, BezPath, Point, Rect, Vec2};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> FramewrightResult<Self> {
        if num == 0 {
            return Err(FramewrightError::validation("Fps num must be > 0"));
        }
        if den == 0 {
            return Err(FramewrightError::validation("Fps den must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn whole(fps: u32) -> FramewrightResult<Self> {
        Self::new(fps, 1)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }
}

/// Fixed integer time base: one tick lasts `num/den` seconds.
///
/// Presentation timestamps are expressed in ticks of this base rather than
/// floating-point seconds, so timestamps stay exact across thousands of
/// frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// Time base in which one tick is exactly one frame interval.
    pub fn per_frame(fps: Fps) -> Self {
        Self {
            num: fps.den,
            den: fps.num,
        }
    }

    pub fn ticks_to_secs(self, ticks: u64) -> f64 {
        (ticks as f64) * f64::from(self.num) / f64::from(self.den)
    }
}

/// Presentation timestamp in ticks of an associated [`TimeBase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Pts(pub u64);

/// Half-open time range in seconds: `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> FramewrightResult<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(FramewrightError::validation(
                "TimeRange bounds must be finite",
            ));
        }
        if start < 0.0 {
            return Err(FramewrightError::validation("TimeRange start must be >= 0"));
        }
        if start > end {
            return Err(FramewrightError::validation("TimeRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    pub fn contains(self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

/// Straight (non-premultiplied) RGBA8 color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    pub const BLACK: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform2D {
    pub translate: Vec2,
    pub rotation_rad: f64,
    pub scale: Vec2,  // default (1,1)
    pub anchor: Vec2, // pivot in local space
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            translate: Vec2::ZERO,
            rotation_rad: 0.0,
            scale: Vec2::new(1.0, 1.0),
            anchor: Vec2::ZERO,
        }
    }
}

impl Transform2D {
    pub fn to_affine(self) -> Affine {
        let t_translate = Affine::translate(self.translate);
        let t_anchor = Affine::translate(self.anchor);
        let t_unanchor = Affine::translate(-self.anchor);
        let t_rotate = Affine::rotate(self.rotation_rad);
        let t_scale = Affine::scale_non_uniform(self.scale.x, self.scale.y);

        // Canonical order:
        // T(translate) * T(anchor) * R(rot) * S(scale) * T(-anchor)
        t_translate * t_anchor * t_rotate * t_scale * t_unanchor
    }

    pub fn validate(&self) -> FramewrightResult<()> {
        let vals = [
            self.translate.x,
            self.translate.y,
            self.rotation_rad,
            self.scale.x,
            self.scale.y,
            self.anchor.x,
            self.anchor.y,
        ];
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(FramewrightError::validation(
                "transform components must be finite",
            ));
        }
        Ok(())
    }
}

/// Immutable pixel buffer in row-major RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}

impl PixelBuffer {
    pub fn byte_len_for(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Write the buffer as a PNG (straight alpha).
    pub fn write_png(&self, path: impl AsRef<Path>) -> FramewrightResult<()> {
        let mut data = self.data.clone();
        if self.premultiplied {
            crate::composite::unpremultiply_rgba8_in_place(&mut data);
        }
        use anyhow::Context as _;
        image::save_buffer_with_format(
            path.as_ref(),
            &data,
            self.width,
            self.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("write png '{}'", path.as_ref().display()))?;
        Ok(())
    }
}

/// One rasterized frame tagged with its presentation timestamp.
///
/// Frames are consumed exactly once by the encoder; they are never reused.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub pts: Pts,
    pub buffer: PixelBuffer,
}
