//! Error types for the icon pipeline and the shader renderer
//!
//! Pipeline errors are `Clone` because concurrent callers waiting on the
//! same in-flight icon all receive the same outcome.

use std::time::Duration;
use thiserror::Error;

/// Result alias for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failures while loading or processing an icon
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// No icon source was given
    #[error("no icon source provided")]
    EmptySource,

    /// The icon did not finish loading within its budget
    #[error("timeout loading {icon} after {after:?}")]
    LoadTimeout { icon: String, after: Duration },

    /// The icon could not be fetched or decoded
    #[error("failed to load image from {icon}: {reason}")]
    LoadError { icon: String, reason: String },

    /// A background worker reported a failure
    #[error("worker processing failed: {0}")]
    WorkerProcessing(String),

    /// A background worker never replied
    #[error("worker request {id} timed out after {after:?}")]
    WorkerTimeout { id: u64, after: Duration },

    /// A submission was attempted before the pool was created
    #[error("worker pool not initialized")]
    PoolUninitialized,

    /// The pipeline (or its pool) was shut down
    #[error("icon pipeline has been shut down")]
    ShutDown,

    /// The job producing this result went away without answering
    #[error("processing was cancelled")]
    Cancelled,
}

impl PipelineError {
    pub(crate) fn load(icon: &str, reason: impl ToString) -> Self {
        Self::LoadError {
            icon: icon.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of a shader renderer instance
///
/// Every variant is terminal for the instance that produced it.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("GPU context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    #[error("renderer not ready: {0}")]
    NotReady(&'static str),

    #[error("frame readback failed: {0}")]
    Readback(String),
}

/// Failures loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}
