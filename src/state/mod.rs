//! State shared across the pipeline
//!
//! - Pipeline data structures (data.rs)
//! - Device detection and configuration (config.rs)
//! - Liquid metal shader parameters (params.rs)

pub mod config;
pub mod data;
pub mod params;

pub use config::{DeviceProfile, FieldSettings, PipelineConfig, RenderSettings};
pub use data::{IconKind, IconSource, ProcessedIcon};
pub use params::{ShaderParams, Theme};
