//! Background icon processing
//!
//! This module handles:
//! - The CPU transforms for logos and metallic icons (process.rs)
//! - Request/response messages and the per-request handler (protocol.rs)
//! - The thread pool correlating replies by request id (pool.rs)

pub mod pool;
pub mod process;
pub mod protocol;

pub use pool::WorkerPool;
pub use process::ProcessSettings;
pub use protocol::{ProcessMode, WorkerMessage, WorkerRequest, WorkerResponse};
