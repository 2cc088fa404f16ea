//! Icon rasterizer
//!
//! Loads an icon through an [`AssetFetcher`] and decodes it into a
//! [`RasterBitmap`]. SVGs are always rendered at an explicit square size,
//! since icons exported without width/height would otherwise fall back to
//! whatever default the SVG parser picks. Raster images keep their natural
//! size; the workers resize them.

use image::imageops::FilterType;
use resvg::{tiny_skia, usvg};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use super::fetch::AssetFetcher;
use crate::error::{PipelineError, Result};

/// Resampling quality requested for a bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeQuality {
    /// Nearest neighbour, no anti-aliasing (low-end devices)
    Pixelated,
    /// Bilinear
    Low,
    /// Bicubic
    Medium,
}

impl ResizeQuality {
    /// Quality for a path: pixelated on low-end devices, `preferred` otherwise
    pub fn for_device(low_end: bool, preferred: ResizeQuality) -> Self {
        if low_end {
            ResizeQuality::Pixelated
        } else {
            preferred
        }
    }

    pub fn filter(self) -> FilterType {
        match self {
            ResizeQuality::Pixelated => FilterType::Nearest,
            ResizeQuality::Low => FilterType::Triangle,
            ResizeQuality::Medium => FilterType::CatmullRom,
        }
    }
}

/// A decoded icon, owned by exactly one stage at a time
///
/// Not `Clone`: handing it to a worker moves it, and the rasterizer cannot
/// touch it afterwards.
pub struct RasterBitmap {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8
    pub pixels: Vec<u8>,
    /// Size the bitmap was requested at
    pub target_size: u32,
    pub quality: ResizeQuality,
}

impl RasterBitmap {
    /// Wrap premultiplied RGBA pixels
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            pixels,
            target_size: width.max(height),
            quality: ResizeQuality::Low,
        }
    }

    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        self.pixels[((y * self.width + x) * 4 + 3) as usize]
    }
}

impl fmt::Debug for RasterBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("target_size", &self.target_size)
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

/// Whether a source or its bytes describe an SVG
pub fn is_svg(source: &str, bytes: &[u8]) -> bool {
    if source.to_ascii_lowercase().ends_with(".svg") {
        return true;
    }
    let head = &bytes[..bytes.len().min(256)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

/// Turns icon sources into bitmaps
#[derive(Clone)]
pub struct Rasterizer {
    fetcher: Arc<dyn AssetFetcher>,
}

impl Rasterizer {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { fetcher }
    }

    /// Load and decode an icon, failing with `LoadTimeout` after `timeout`
    pub async fn rasterize(
        &self,
        source: &str,
        target_size: u32,
        quality: ResizeQuality,
        timeout: Duration,
    ) -> Result<RasterBitmap> {
        match tokio::time::timeout(timeout, self.load(source, target_size, quality)).await {
            Ok(result) => result,
            // Dropping the load future abandons the fetch
            Err(_) => Err(PipelineError::LoadTimeout {
                icon: source.to_string(),
                after: timeout,
            }),
        }
    }

    async fn load(
        &self,
        source: &str,
        target_size: u32,
        quality: ResizeQuality,
    ) -> Result<RasterBitmap> {
        let bytes = self.fetcher.fetch(source).await?;
        let owned_source = source.to_string();

        // Decoding is CPU-bound; keep it off the async threads
        task::spawn_blocking(move || decode_blocking(&owned_source, &bytes, target_size, quality))
            .await
            .map_err(|e| PipelineError::load(source, format!("decode task failed: {}", e)))?
    }
}

/// Blocking decode of fetched bytes
pub fn decode_blocking(
    source: &str,
    bytes: &[u8],
    target_size: u32,
    quality: ResizeQuality,
) -> Result<RasterBitmap> {
    let bitmap = if is_svg(source, bytes) {
        render_svg(source, bytes, target_size, quality)?
    } else {
        decode_raster(source, bytes, target_size, quality)?
    };

    tracing::debug!(
        icon = source,
        width = bitmap.width,
        height = bitmap.height,
        "rasterized icon"
    );
    Ok(bitmap)
}

/// Render an SVG into a `target_size` square
fn render_svg(
    source: &str,
    bytes: &[u8],
    target_size: u32,
    quality: ResizeQuality,
) -> Result<RasterBitmap> {
    let target = target_size.max(1);
    let options = usvg::Options {
        shape_rendering: match quality {
            ResizeQuality::Pixelated => usvg::ShapeRendering::CrispEdges,
            _ => usvg::ShapeRendering::GeometricPrecision,
        },
        ..Default::default()
    };

    let tree = usvg::Tree::from_data(bytes, &options)
        .map_err(|e| PipelineError::load(source, format!("invalid SVG: {}", e)))?;

    // Width and height are both forced, like explicit resize hints
    let size = tree.size();
    let transform = tiny_skia::Transform::from_scale(
        target as f32 / size.width(),
        target as f32 / size.height(),
    );

    let mut pixmap = tiny_skia::Pixmap::new(target, target)
        .ok_or_else(|| PipelineError::load(source, "cannot allocate pixmap"))?;
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    Ok(RasterBitmap {
        width: target,
        height: target,
        pixels: pixmap.take(),
        target_size: target,
        quality,
    })
}

/// Decode a PNG/JPEG/WebP icon at its natural size
fn decode_raster(
    source: &str,
    bytes: &[u8],
    target_size: u32,
    quality: ResizeQuality,
) -> Result<RasterBitmap> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::load(source, format!("failed to decode: {}", e)))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut pixels = rgba.into_raw();
    premultiply(&mut pixels);

    Ok(RasterBitmap {
        width,
        height,
        pixels,
        target_size,
        quality,
    })
}

/// Premultiply straight RGBA in place
fn premultiply(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}
