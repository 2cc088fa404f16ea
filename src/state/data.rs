//! Shared data structures for the icon pipeline
//!
//! These structs represent the data that flows between the rasterizer,
//! the background workers, the cache and the shader renderer.

use std::fmt;

/// Identifier of an icon asset (relative path, absolute path, `file://` URI or URL)
pub type IconSource = String;

/// Which processing produced a [`ProcessedIcon`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    /// Grayscale interior distance field (logo path)
    DistanceField,
    /// Red channel replaced by `255 - alpha` (metallic icon path)
    AlphaMask,
}

/// Output of background processing, ready for texture upload
///
/// Shared read-only through `Arc`; the renderer never mutates it.
#[derive(Clone, PartialEq)]
pub struct ProcessedIcon {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixels, `width * height * 4` bytes
    pub pixels: Vec<u8>,
    /// How the pixels were produced
    pub kind: IconKind,
    /// Encoded PNG of `pixels` (distance-field path only)
    pub png: Option<Vec<u8>>,
}

impl ProcessedIcon {
    /// Aspect ratio used for the `u_img_ratio` uniform
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }

    /// RGBA of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

// Pixel buffers are large; keep Debug output readable
impl fmt::Debug for ProcessedIcon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessedIcon")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("kind", &self.kind)
            .field("png_bytes", &self.png.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

/// Build the cache key for the metallic path
pub fn metallic_cache_key(source: &str, size: u32) -> String {
    format!("metallic_{}_{}", size, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metallic_cache_key() {
        assert_eq!(
            metallic_cache_key("/icons/rust.svg", 64),
            "metallic_64_/icons/rust.svg"
        );
    }

    #[test]
    fn test_aspect_ratio() {
        let icon = ProcessedIcon {
            width: 160,
            height: 80,
            pixels: vec![0; 160 * 80 * 4],
            kind: IconKind::AlphaMask,
            png: None,
        };
        assert_eq!(icon.aspect_ratio(), 2.0);
    }
}
