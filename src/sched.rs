use crate::{
    core::{Canvas, Fps, Frame, Pts, TimeBase},
    error::FramewrightResult,
    raster::Rasterizer,
    scene::Scene,
};

/// Walks a scene's timeline at a fixed frame rate and rasterizes each instant.
///
/// The scheduler is a finite, forward-only iterator: frame `i` is presented at
/// `t_i = i / fps` and frames come out in strictly increasing pts order. Each
/// frame is produced once and handed off; the sequence is not restartable.
/// Consuming it lazily is what keeps the pipeline's memory bounded.
pub struct FrameScheduler<'a> {
    scene: &'a Scene,
    rasterizer: &'a mut Rasterizer,
    fps: Fps,
    canvas: Canvas,
    time_base: TimeBase,
    next: u64,
    total: u64,
}

impl<'a> FrameScheduler<'a> {
    /// `fps` is the output rate and `canvas` the output resolution; both may
    /// differ from the scene's own when the job overrides them.
    pub fn new(scene: &'a Scene, rasterizer: &'a mut Rasterizer, fps: Fps, canvas: Canvas) -> Self {
        let total = scene.frame_count(fps);
        Self {
            scene,
            rasterizer,
            fps,
            canvas,
            time_base: TimeBase::per_frame(fps),
            next: 0,
            total,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.total
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn render_frame(&mut self, index: u64) -> FramewrightResult<Frame> {
        // t_i derived from the index each time, never accumulated, so there is
        // no compounding rounding error across long timelines.
        let t = index as f64 * self.fps.frame_duration_secs();
        let layers = self.scene.layers_active_at(t);
        let buffer = self.rasterizer.render(&layers, self.canvas)?;
        Ok(Frame {
            index,
            // One tick of the per-frame time base per frame: exact integers.
            pts: Pts(index),
            buffer,
        })
    }
}

impl Iterator for FrameScheduler<'_> {
    type Item = FramewrightResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.render_frame(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        core::{BezPath, Canvas, Rgba8, TimeRange, Transform2D},
        raster::RasterSettings,
        resource::MemoryResourceLoader,
        scene::{Layer, LayerContent, VectorLayer},
    };

    fn scene_with_rect(duration_s: f64) -> Scene {
        let mut path = BezPath::new();
        path.move_to((4.0, 4.0));
        path.line_to((12.0, 4.0));
        path.line_to((12.0, 12.0));
        path.close_path();
        Scene::new(
            Canvas {
                width: 16,
                height: 16,
            },
            Fps::whole(30).unwrap(),
            duration_s,
            vec![Layer {
                id: "r".to_string(),
                range: TimeRange::new(0.0, duration_s).unwrap(),
                transform: Transform2D::default(),
                opacity: 1.0,
                z: 0,
                content: LayerContent::Vector(VectorLayer {
                    path,
                    fill: Some(Rgba8::WHITE),
                    stroke: None,
                }),
            }],
        )
        .unwrap()
    }

    fn rasterizer() -> Rasterizer {
        Rasterizer::new(
            RasterSettings::default(),
            Arc::new(MemoryResourceLoader::new()),
        )
    }

    #[test]
    fn produces_floor_duration_times_fps_frames() {
        let scene = scene_with_rect(2.0);
        let mut r = rasterizer();
        let sched = FrameScheduler::new(&scene, &mut r, Fps::whole(30).unwrap(), scene.canvas);
        assert_eq!(sched.frame_count(), 60);
        let frames: Vec<_> = sched.collect::<FramewrightResult<Vec<_>>>().unwrap();
        assert_eq!(frames.len(), 60);
    }

    #[test]
    fn pts_strictly_increasing_from_zero() {
        let scene = scene_with_rect(1.0);
        let mut r = rasterizer();
        let frames: Vec<_> = FrameScheduler::new(&scene, &mut r, Fps::whole(30).unwrap(), scene.canvas)
            .collect::<FramewrightResult<Vec<_>>>()
            .unwrap();
        assert_eq!(frames[0].pts, Pts(0));
        for pair in frames.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
        }
    }

    #[test]
    fn time_base_converts_pts_back_to_frame_times() {
        let scene = scene_with_rect(1.0);
        let mut r = rasterizer();
        let fps = Fps::new(30000, 1001).unwrap();
        let sched = FrameScheduler::new(&scene, &mut r, fps, scene.canvas);
        let tb = sched.time_base();
        assert_eq!(tb, TimeBase::per_frame(fps));
        // Pts(i) in this base is exactly t_i = i / fps.
        let t = tb.ticks_to_secs(29);
        assert!((t - 29.0 * fps.frame_duration_secs()).abs() < 1e-12);
    }

    #[test]
    fn fps_override_changes_frame_count() {
        let scene = scene_with_rect(2.0);
        let mut r = rasterizer();
        let sched = FrameScheduler::new(&scene, &mut r, Fps::whole(24).unwrap(), scene.canvas);
        assert_eq!(sched.frame_count(), 48);
    }

    #[test]
    fn fractional_fps_floors_frame_count() {
        let scene = scene_with_rect(2.0);
        let mut r = rasterizer();
        let sched = FrameScheduler::new(&scene, &mut r, Fps::new(30000, 1001).unwrap(), scene.canvas);
        assert_eq!(sched.frame_count(), 59);
    }

    #[test]
    fn static_scene_frames_are_identical() {
        let scene = scene_with_rect(0.5);
        let mut r = rasterizer();
        let frames: Vec<_> = FrameScheduler::new(&scene, &mut r, Fps::whole(30).unwrap(), scene.canvas)
            .collect::<FramewrightResult<Vec<_>>>()
            .unwrap();
        assert_eq!(frames.len(), 15);
        for f in &frames[1..] {
            assert_eq!(f.buffer.data, frames[0].buffer.data);
        }
    }
}
