//! Premultiplied-alpha compositing primitives.
//!
//! The rasterizer composites layers internally; these helpers cover the
//! remaining seams: flattening premultiplied output over an opaque background
//! before handing pixels to the encoder, and converting between straight and
//! premultiplied alpha at decode/export boundaries.

use crate::error::{FramewrightError, FramewrightResult};

pub type PremulRgba8 = [u8; 4];

/// Source-over: `out = src*opacity + dst*(1 - srcAlpha*opacity)`, all channels
/// premultiplied.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = sa.saturating_add(mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

/// Flatten premultiplied RGBA over an opaque background, producing opaque
/// RGBA8 the encoder can feed to ffmpeg as `rgba` raw video.
pub fn flatten_to_opaque_rgba8(
    dst: &mut [u8],
    src: &[u8],
    bg_rgba: [u8; 4],
) -> FramewrightResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(FramewrightError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg = [bg_rgba[0], bg_rgba[1], bg_rgba[2], 255u8];

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        if s[3] == 255 {
            d.copy_from_slice(s);
            continue;
        }
        let out = over(bg, [s[0], s[1], s[2], s[3]], 1.0);
        d[0] = out[0];
        d[1] = out[1];
        d[2] = out[2];
        d[3] = 255;
    }

    Ok(())
}

pub fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((u16::from(px[0]) * a + 127) / 255) as u8;
        px[1] = ((u16::from(px[1]) * a + 127) / 255) as u8;
        px[2] = ((u16::from(px[2]) * a + 127) / 255) as u8;
    }
}

pub fn unpremultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        if a == 0 || a == 255 {
            continue;
        }
        px[0] = ((u32::from(px[0]) * 255 + a / 2) / a).min(255) as u8;
        px[1] = ((u32::from(px[1]) * 255 + a / 2) / a).min(255) as u8;
        px[2] = ((u32::from(px[2]) * 255 + a / 2) / a).min(255) as u8;
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
