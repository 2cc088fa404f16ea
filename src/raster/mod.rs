//! Icon loading
//!
//! This module handles:
//! - Fetching icon bytes from disk or the network (fetch.rs)
//! - Decoding SVG and raster icons into transferable bitmaps (loader.rs)

pub mod fetch;
pub mod loader;

pub use fetch::{default_fetcher, AssetFetcher, FsFetcher};
pub use loader::{RasterBitmap, Rasterizer, ResizeQuality};
