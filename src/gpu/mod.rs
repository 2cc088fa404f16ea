//! GPU rendering of the liquid metal effect
//!
//! Architecture:
//! - `shaders.rs` - WGSL shader source code
//! - `renderer.rs` - per-icon wgpu renderer with an offscreen backing target
//! - `pacing.rs` - frame pacing and resize debouncing
//! - `render_loop.rs` - tokio-driven animation loop and its control handle
//!
//! Each displayed icon owns one renderer; no GPU state is shared.

pub mod pacing;
pub mod render_loop;
pub mod renderer;
pub mod shaders;

pub use pacing::{backing_size, FramePacer, ResizeDebouncer, Tick};
pub use render_loop::{FrameSink, LoopState, RenderHandle, RenderLoop};
pub use renderer::{Frame, MetallicRenderer, RendererState};
