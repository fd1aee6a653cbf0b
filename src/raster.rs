use std::{collections::HashMap, sync::Arc};

use crate::{
    composite::premultiply_rgba8_in_place,
    core::{Affine, BezPath, Canvas, PixelBuffer, Point, Rect, Rgba8, Vec2},
    error::{FramewrightError, FramewrightResult},
    resource::ResourceLoader,
    scene::{FitPolicy, ImageLayer, Layer, LayerContent, TextAlign, TextLayer, VectorLayer},
};

/// Flattening tolerance for stroke expansion, in layer-local units.
const STROKE_TOLERANCE: f64 = 0.25;

#[derive(Clone, Debug)]
pub struct RasterSettings {
    /// Background the canvas is cleared to before painting (straight alpha).
    /// `None` leaves the canvas transparent.
    pub background: Option<Rgba8>,
    /// Transform applied ahead of every layer transform. The pipeline uses it
    /// to map scene coordinates onto the output resolution.
    pub root: Affine,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            background: None,
            root: Affine::IDENTITY,
        }
    }
}

/// RGBA8 brush color used by Parley text layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextBrushRgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

#[derive(Clone)]
struct CachedFont {
    family: String,
    font: vello_cpu::peniko::FontData,
}

/// CPU rasterizer: paints one time-filtered, z-ordered layer stack into a
/// premultiplied RGBA8 pixel buffer.
///
/// Each render job owns its own `Rasterizer`; decoded font and image caches
/// live here and are never shared across jobs, so concurrent jobs cannot
/// observe each other's state.
pub struct Rasterizer {
    settings: RasterSettings,
    loader: Arc<dyn ResourceLoader>,
    fonts: HashMap<String, CachedFont>,
    images: HashMap<String, vello_cpu::Image>,
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
}

impl Rasterizer {
    pub fn new(settings: RasterSettings, loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            settings,
            loader,
            fonts: HashMap::new(),
            images: HashMap::new(),
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
        }
    }

    /// Paint `layers` (already filtered to one instant and sorted in paint
    /// order) onto a fresh canvas.
    pub fn render(&mut self, layers: &[&Layer], canvas: Canvas) -> FramewrightResult<PixelBuffer> {
        let width_u16: u16 = canvas
            .width
            .try_into()
            .map_err(|_| FramewrightError::validation("canvas width exceeds u16"))?;
        let height_u16: u16 = canvas
            .height
            .try_into()
            .map_err(|_| FramewrightError::validation("canvas height exceeds u16"))?;
        if width_u16 == 0 || height_u16 == 0 {
            return Err(FramewrightError::validation(
                "canvas width/height must be > 0",
            ));
        }

        let mut pixmap = vello_cpu::Pixmap::new(width_u16, height_u16);
        if let Some(bg) = self.settings.background {
            clear_pixmap(&mut pixmap, premul_rgba8(bg.r, bg.g, bg.b, bg.a));
        }

        let mut ctx = vello_cpu::RenderContext::new(width_u16, height_u16);
        for layer in layers {
            self.draw_layer(&mut ctx, layer)?;
        }
        ctx.flush();
        ctx.render_to_pixmap(&mut pixmap);

        Ok(PixelBuffer {
            width: canvas.width,
            height: canvas.height,
            data: pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        })
    }

    fn draw_layer(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        layer: &Layer,
    ) -> FramewrightResult<()> {
        ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_transform(affine_to_cpu(
            self.settings.root * layer.transform.to_affine(),
        ));

        let opacity = layer.opacity.clamp(0.0, 1.0) as f32;
        if opacity <= 0.0 {
            return Ok(());
        }
        let layered = opacity < 1.0;
        if layered {
            ctx.push_opacity_layer(opacity);
        }

        match &layer.content {
            LayerContent::Text(t) => self.draw_text(ctx, layer, t)?,
            LayerContent::Vector(v) => draw_vector(ctx, layer, v)?,
            LayerContent::Image(img) => self.draw_image(ctx, layer, img)?,
        }

        if layered {
            ctx.pop_layer();
        }
        Ok(())
    }

    fn draw_text(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        layer: &Layer,
        text: &TextLayer,
    ) -> FramewrightResult<()> {
        let cached = self.ensure_font(&text.font, &layer.id)?;
        let brush = TextBrushRgba8 {
            r: text.color.r,
            g: text.color.g,
            b: text.color.b,
            a: text.color.a,
        };
        let layout = self.layout_plain(
            &text.text,
            &cached.family,
            text.size_px,
            brush,
            text.max_width_px,
            text.align,
        )?;

        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };

                let brush = run.style().brush;
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    brush.r, brush.g, brush.b, brush.a,
                ));

                let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(&cached.font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }

        Ok(())
    }

    fn draw_image(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        layer: &Layer,
        img: &ImageLayer,
    ) -> FramewrightResult<()> {
        let paint = self.ensure_image(&img.image, &layer.id)?;
        let (iw, ih) = image_paint_size(&paint)?;

        ctx.set_paint_transform(affine_to_cpu(fit_affine(iw, ih, img.dest, img.fit)));
        ctx.set_paint(paint);
        // fill_rect bounds the paint to the placement rectangle, which is what
        // crops Cover overflow.
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            img.dest.x0, img.dest.y0, img.dest.x1, img.dest.y1,
        ));
        Ok(())
    }

    fn ensure_font(&mut self, id: &str, layer_id: &str) -> FramewrightResult<CachedFont> {
        if let Some(cached) = self.fonts.get(id) {
            return Ok(cached.clone());
        }

        let bytes = self.loader.resolve(id).map_err(|e| {
            FramewrightError::resource_missing(format!("layer '{layer_id}': font {e}"))
        })?;

        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.clone()), None);
        let family_id = families.first().map(|(fid, _)| *fid).ok_or_else(|| {
            FramewrightError::resource_missing(format!(
                "layer '{layer_id}': font '{id}' contains no usable font families"
            ))
        })?;
        let family = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| {
                FramewrightError::resource_missing(format!(
                    "layer '{layer_id}': font '{id}' family has no name"
                ))
            })?
            .to_string();

        let font =
            vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes), 0);
        let cached = CachedFont { family, font };
        self.fonts.insert(id.to_string(), cached.clone());
        Ok(cached)
    }

    fn ensure_image(&mut self, id: &str, layer_id: &str) -> FramewrightResult<vello_cpu::Image> {
        if let Some(paint) = self.images.get(id) {
            return Ok(paint.clone());
        }

        let bytes = self.loader.resolve(id).map_err(|e| {
            FramewrightError::resource_missing(format!("layer '{layer_id}': image {e}"))
        })?;

        use anyhow::Context as _;
        let dyn_img = image::load_from_memory(&bytes)
            .with_context(|| format!("layer '{layer_id}': decode image '{id}'"))?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut rgba8_premul = rgba.into_raw();
        premultiply_rgba8_in_place(&mut rgba8_premul);

        let pixmap = premul_bytes_to_pixmap(&rgba8_premul, width, height)?;
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };

        self.images.insert(id.to_string(), paint.clone());
        Ok(paint)
    }

    fn layout_plain(
        &mut self,
        text: &str,
        family: &str,
        size_px: f32,
        brush: TextBrushRgba8,
        max_width_px: Option<f32>,
        align: TextAlign,
    ) -> FramewrightResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(FramewrightError::validation(
                "text size_px must be finite and > 0",
            ));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family.to_string())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        let alignment = match align {
            TextAlign::Left => parley::Alignment::Start,
            TextAlign::Center => parley::Alignment::Center,
            TextAlign::Right => parley::Alignment::End,
        };
        if let Some(w) = max_width_px {
            layout.break_all_lines(Some(w));
            layout.align(Some(w), alignment, parley::AlignmentOptions::default());
        } else {
            layout.break_all_lines(None);
            layout.align(None, alignment, parley::AlignmentOptions::default());
        }

        Ok(layout)
    }
}

fn draw_vector(
    ctx: &mut vello_cpu::RenderContext,
    _layer: &Layer,
    v: &VectorLayer,
) -> FramewrightResult<()> {
    if let Some(fill) = v.fill {
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
            fill.r, fill.g, fill.b, fill.a,
        ));
        ctx.fill_path(&bezpath_to_cpu(&v.path));
    }

    if let Some(stroke) = &v.stroke {
        // Expand the stroke to a fill region so only one scan-conversion path
        // exists in the backend.
        let style = kurbo::Stroke::new(stroke.width);
        let expanded = kurbo::stroke(
            v.path.iter(),
            &style,
            &kurbo::StrokeOpts::default(),
            STROKE_TOLERANCE,
        );
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
            stroke.color.r,
            stroke.color.g,
            stroke.color.b,
            stroke.color.a,
        ));
        ctx.fill_path(&bezpath_to_cpu(&expanded));
    }

    Ok(())
}

/// Affine mapping image pixel space into `dest` according to the fit policy.
fn fit_affine(iw: f64, ih: f64, dest: Rect, fit: FitPolicy) -> Affine {
    let (sx, sy) = match fit {
        FitPolicy::Stretch => (dest.width() / iw, dest.height() / ih),
        FitPolicy::Contain => {
            let s = (dest.width() / iw).min(dest.height() / ih);
            (s, s)
        }
        FitPolicy::Cover => {
            let s = (dest.width() / iw).max(dest.height() / ih);
            (s, s)
        }
    };

    // Center the scaled image inside the placement rect. For Stretch the
    // offsets are zero; for Cover they are negative (crop).
    let ox = (dest.width() - iw * sx) / 2.0;
    let oy = (dest.height() - ih * sy) / 2.0;

    Affine::translate(Vec2::new(dest.x0 + ox, dest.y0 + oy))
        * Affine::scale_non_uniform(sx, sy)
}

fn premul_rgba8(r: u8, g: u8, b: u8, a: u8) -> [u8; 4] {
    let af = u16::from(a) + 1;
    let premul = |c: u8| -> u8 { ((u16::from(c) * af) >> 8) as u8 };
    [premul(r), premul(g), premul(b), a]
}

fn clear_pixmap(pixmap: &mut vello_cpu::Pixmap, rgba: [u8; 4]) {
    let data = pixmap.data_as_u8_slice_mut();
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&rgba);
    }
}

fn premul_bytes_to_pixmap(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> FramewrightResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| FramewrightError::validation("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| FramewrightError::validation("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(FramewrightError::validation(
            "decoded image byte length mismatch",
        ));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for px in rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}

fn image_paint_size(image: &vello_cpu::Image) -> FramewrightResult<(f64, f64)> {
    match &image.image {
        vello_cpu::ImageSource::Pixmap(p) => Ok((f64::from(p.width()), f64::from(p.height()))),
        vello_cpu::ImageSource::OpaqueId(_) => Err(FramewrightError::validation(
            "cpu rasterizer does not support opaque image ids",
        )),
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn point_to_cpu(p: Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}
