//! CPU-bound icon transforms run on the worker threads
//!
//! Two modes:
//! - Metallic: downscale, then write `255 - alpha` into the red channel.
//!   The shader reads red as a relief map, so opaque pixels end up dark.
//! - Distance field: relax a Poisson-like equation inside the icon shape.
//!   The result is brightest on the shape boundary and darkest where the
//!   shape is thickest; pixels outside the shape are opaque white.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use crate::raster::{RasterBitmap, ResizeQuality};
use crate::state::{FieldSettings, IconKind, ProcessedIcon};

/// Default downscale bound of the metallic mode
pub const DEFAULT_METALLIC_MAX: u32 = 128;

/// Exponent of the gray mapping `255 * (1 - n^ALPHA)`
const FIELD_EXPONENT: f32 = 2.0;

/// Settings shared by every worker thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSettings {
    pub low_end: bool,
    pub field: FieldSettings,
}

/// Scale (w, h) down so both fit in `max_size`, keeping the aspect ratio
pub fn fit_within(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width <= max_size && height <= max_size {
        return (width, height);
    }
    let ratio = (max_size as f64 / width as f64).min(max_size as f64 / height as f64);
    let w = (width as f64 * ratio).round() as u32;
    let h = (height as f64 * ratio).round() as u32;
    (w.max(1), h.max(1))
}

/// Working resolution of the distance field: clamped into
/// `[min_size, max_size]` along the longer side, then floored to a multiple of 4
pub fn field_dimensions(width: u32, height: u32, min_size: u32, max_size: u32) -> (u32, u32) {
    let (mut w, mut h) = (width, height);

    let out_of_band = w > max_size || h > max_size || w < min_size || h < min_size;
    if out_of_band && w > 0 && h > 0 {
        let ratio = w as f64 / h as f64;
        if ratio > 1.0 {
            w = w.clamp(min_size, max_size);
            h = (w as f64 / ratio).round() as u32;
        } else {
            h = h.clamp(min_size, max_size);
            w = (h as f64 * ratio).round() as u32;
        }
    }

    ((w >> 2 << 2).max(4), (h >> 2 << 2).max(4))
}

/// Resample premultiplied RGBA pixels
fn resize_pixels(
    bitmap: RasterBitmap,
    width: u32,
    height: u32,
    quality: ResizeQuality,
) -> Result<Vec<u8>, String> {
    if (bitmap.width, bitmap.height) == (width, height) {
        return Ok(bitmap.pixels);
    }

    let image = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels)
        .ok_or_else(|| "bitmap buffer does not match its dimensions".to_string())?;
    let resized = image::imageops::resize(&image, width, height, quality.filter());
    Ok(resized.into_raw())
}

/// Metallic mode: downscale and invert alpha into the red channel
pub fn process_metallic(bitmap: RasterBitmap, max_size: u32) -> Result<ProcessedIcon, String> {
    let (width, height) = fit_within(bitmap.width, bitmap.height, max_size.max(1));
    let quality = bitmap.quality;
    let mut pixels = resize_pixels(bitmap, width, height, quality)?;

    for px in pixels.chunks_exact_mut(4) {
        px[0] = 255 - px[3];
    }

    Ok(ProcessedIcon {
        width,
        height,
        pixels,
        kind: IconKind::AlphaMask,
        png: None,
    })
}

/// Pixels whose alpha is above the threshold
pub fn shape_mask(pixels: &[u8], threshold: u8) -> Vec<bool> {
    pixels.chunks_exact(4).map(|px| px[3] > threshold).collect()
}

/// Shape pixels on the image frame or next to a non-shape pixel
pub fn boundary_mask(shape: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut boundary = vec![false; shape.len()];

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if !shape[i] {
                continue;
            }
            let on_frame = x == 0 || y == 0 || x == width - 1 || y == height - 1;
            boundary[i] = on_frame
                || !shape[i - 1]
                || !shape[i + 1]
                || !shape[i - width]
                || !shape[i + width];
        }
    }

    boundary
}

/// Jacobi relaxation of `u = (C + sum of 4 neighbours) / 4` inside the shape,
/// with boundary and outside pixels held at zero
pub fn relax_field(
    shape: &[bool],
    boundary: &[bool],
    width: usize,
    iterations: u32,
    source_term: f32,
) -> Vec<f32> {
    let len = shape.len();
    let mut u = vec![0f32; len];
    let mut next = vec![0f32; len];

    for _ in 0..iterations {
        for i in 0..len {
            if !shape[i] || boundary[i] {
                next[i] = 0.0;
                continue;
            }
            // Interior pixels never sit on the frame, so all neighbours exist
            let sum = u[i - 1] + u[i + 1] + u[i - width] + u[i + width];
            next[i] = (source_term + sum) * 0.25;
        }
        std::mem::swap(&mut u, &mut next);
    }

    u
}

/// Distance-field mode: grayscale interior field plus its PNG encoding
pub fn process_distance_field(
    bitmap: RasterBitmap,
    settings: &ProcessSettings,
) -> Result<ProcessedIcon, String> {
    let field = &settings.field;
    let (width, height) =
        field_dimensions(bitmap.width, bitmap.height, field.min_size, field.max_size);

    let quality = if settings.low_end {
        ResizeQuality::Pixelated
    } else {
        ResizeQuality::Low
    };
    let pixels = resize_pixels(bitmap, width, height, quality)?;

    let (w, h) = (width as usize, height as usize);
    let shape = shape_mask(&pixels, field.alpha_threshold);
    let boundary = boundary_mask(&shape, w, h);
    let u = relax_field(&shape, &boundary, w, field.iterations, field.source_term);

    let max = u.iter().copied().fold(0f32, f32::max);
    let inv_max = if max > 0.0 { 1.0 / max } else { 0.0 };

    let mut out = vec![255u8; w * h * 4];
    for (i, px) in out.chunks_exact_mut(4).enumerate() {
        if !shape[i] {
            continue;
        }
        let normalized = u[i] * inv_max;
        let gray = (255.0 * (1.0 - normalized.powf(FIELD_EXPONENT))) as u8;
        px[0] = gray;
        px[1] = gray;
        px[2] = gray;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&out, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;

    Ok(ProcessedIcon {
        width,
        height,
        pixels: out,
        kind: IconKind::DistanceField,
        png: Some(png),
    })
}
