//! Liquid metal icons
//!
//! Off-thread icon processing (rasterize, distance field or alpha mask,
//! cache, prioritized preloads) and a GPU renderer that animates the
//! processed icons with the liquid metal shader.

pub mod cache;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod queue;
pub mod raster;
pub mod state;
pub mod ui;
pub mod worker;

pub use error::{PipelineError, RenderError, Result};
pub use gpu::{MetallicRenderer, RenderLoop};
pub use pipeline::{IconPipeline, PipelineStats};
pub use queue::Priority;
pub use state::{PipelineConfig, ProcessedIcon, ShaderParams, Theme};
pub use ui::IconView;
