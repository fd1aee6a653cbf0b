use crate::{
    core::{BezPath, Canvas, Fps, Rect, Rgba8, TimeRange, Transform2D},
    error::{FramewrightError, FramewrightResult},
};

/// A declarative composition: ordered layers over a timeline.
///
/// A `Scene` is read-only for the lifetime of a render job. Construct one with
/// [`Scene::new`], which validates the whole structure up front; nothing is
/// rendered for an invalid scene.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Scene {
    pub canvas: Canvas,
    pub fps: Fps,
    pub duration_s: f64,
    pub layers: Vec<Layer>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Layer {
    pub id: String,
    pub range: TimeRange,
    pub transform: Transform2D,
    pub opacity: f64, // 0..1
    pub z: i32,
    pub content: LayerContent,
}

/// Closed set of layer kinds; the rasterizer matches exhaustively.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum LayerContent {
    Text(TextLayer),
    Vector(VectorLayer),
    Image(ImageLayer),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TextLayer {
    pub text: String,
    /// Font resource id, resolved through the job's [`ResourceLoader`](crate::ResourceLoader).
    pub font: String,
    pub size_px: f32,
    pub color: Rgba8,
    pub align: TextAlign,
    /// Wrap/alignment width. Without it text is laid out on one line.
    pub max_width_px: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VectorLayer {
    /// Path commands (move/line/curve/close) in layer-local coordinates.
    pub path: BezPath,
    pub fill: Option<Rgba8>,
    pub stroke: Option<StrokeStyle>,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StrokeStyle {
    pub color: Rgba8,
    pub width: f64,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImageLayer {
    /// Image resource id.
    pub image: String,
    /// Placement rectangle in layer-local coordinates.
    pub dest: Rect,
    pub fit: FitPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FitPolicy {
    /// Resample to fill `dest` exactly, ignoring aspect ratio.
    Stretch,
    /// Uniform scale so the whole image fits inside `dest`.
    Contain,
    /// Uniform scale so the image covers `dest`; overflow is cropped.
    Cover,
}

impl Scene {
    pub fn new(
        canvas: Canvas,
        fps: Fps,
        duration_s: f64,
        layers: Vec<Layer>,
    ) -> FramewrightResult<Self> {
        let scene = Self {
            canvas,
            fps,
            duration_s,
            layers,
        };
        scene.validate()?;
        Ok(scene)
    }

    pub fn validate(&self) -> FramewrightResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(FramewrightError::validation(
                "canvas width/height must be > 0",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(FramewrightError::validation("fps must have num>0 and den>0"));
        }
        if !self.duration_s.is_finite() || self.duration_s <= 0.0 {
            return Err(FramewrightError::validation("duration must be > 0 seconds"));
        }

        for layer in &self.layers {
            layer.validate(self.duration_s)?;
        }

        Ok(())
    }

    /// Number of frames a scheduler walking this scene at `fps` produces.
    pub fn frame_count(&self, fps: Fps) -> u64 {
        (self.duration_s * fps.as_f64()).floor().max(0.0) as u64
    }

    /// Layers whose time range contains `t`, sorted by z then insertion order.
    ///
    /// z collisions are not an error; the stable sort makes insertion order
    /// the explicit tie-break, so paint order is always deterministic.
    pub fn layers_active_at(&self, t: f64) -> Vec<&Layer> {
        let mut active: Vec<&Layer> = self
            .layers
            .iter()
            .filter(|l| l.range.contains(t))
            .collect();
        active.sort_by_key(|l| l.z);
        active
    }
}

impl Layer {
    fn validate(&self, scene_duration_s: f64) -> FramewrightResult<()> {
        if self.id.trim().is_empty() {
            return Err(FramewrightError::validation("layer id must be non-empty"));
        }
        if self.range.end > scene_duration_s {
            return Err(FramewrightError::validation(format!(
                "layer '{}' time range exceeds scene duration",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(FramewrightError::validation(format!(
                "layer '{}' opacity must be in [0, 1]",
                self.id
            )));
        }
        self.transform.validate().map_err(|_| {
            FramewrightError::validation(format!("layer '{}' transform must be finite", self.id))
        })?;

        match &self.content {
            LayerContent::Text(t) => {
                if t.font.trim().is_empty() {
                    return Err(FramewrightError::validation(format!(
                        "text layer '{}' font id must be non-empty",
                        self.id
                    )));
                }
                if !t.size_px.is_finite() || t.size_px <= 0.0 {
                    return Err(FramewrightError::validation(format!(
                        "text layer '{}' size_px must be finite and > 0",
                        self.id
                    )));
                }
            }
            LayerContent::Vector(v) => {
                if v.fill.is_none() && v.stroke.is_none() {
                    return Err(FramewrightError::validation(format!(
                        "vector layer '{}' needs a fill or a stroke",
                        self.id
                    )));
                }
                if let Some(s) = &v.stroke
                    && (!s.width.is_finite() || s.width <= 0.0)
                {
                    return Err(FramewrightError::validation(format!(
                        "vector layer '{}' stroke width must be finite and > 0",
                        self.id
                    )));
                }
            }
            LayerContent::Image(img) => {
                if img.image.trim().is_empty() {
                    return Err(FramewrightError::validation(format!(
                        "image layer '{}' image id must be non-empty",
                        self.id
                    )));
                }
                let d = img.dest;
                let finite = [d.x0, d.y0, d.x1, d.y1].iter().all(|v| v.is_finite());
                if !finite || d.width() <= 0.0 || d.height() <= 0.0 {
                    return Err(FramewrightError::validation(format!(
                        "image layer '{}' dest rect must be finite with positive area",
                        self.id
                    )));
                }
            }
        }

        Ok(())
    }
}
