//! Messages exchanged with worker threads

use std::panic::{self, AssertUnwindSafe};

use super::process::{self, ProcessSettings, DEFAULT_METALLIC_MAX};
use crate::raster::RasterBitmap;
use crate::state::ProcessedIcon;

/// Which transform a worker applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Interior distance field for logos
    DistanceField,
    /// Alpha inversion for metallic icons, downscaled to `max_size`
    Metallic { max_size: u32 },
}

impl ProcessMode {
    pub fn metallic() -> Self {
        ProcessMode::Metallic {
            max_size: DEFAULT_METALLIC_MAX,
        }
    }
}

/// A job for one worker; the bitmap moves with it
#[derive(Debug)]
pub struct WorkerRequest {
    pub id: u64,
    pub bitmap: Option<RasterBitmap>,
    pub mode: ProcessMode,
    /// Pick the cheaper resampling filters
    pub low_end: bool,
}

/// Reply to a [`WorkerRequest`] with the same id
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub id: u64,
    pub outcome: Result<ProcessedIcon, String>,
}

/// Everything a worker thread can receive
#[derive(Debug)]
pub enum WorkerMessage {
    Job(WorkerRequest),
    Terminate,
}

impl WorkerRequest {
    /// Run the job on the current thread
    ///
    /// Never panics: a panic inside processing becomes an error reply.
    /// The bitmap is dropped before returning.
    pub fn run(self, settings: &ProcessSettings) -> WorkerResponse {
        let WorkerRequest {
            id,
            bitmap,
            mode,
            low_end,
        } = self;
        let settings = ProcessSettings {
            low_end,
            ..*settings
        };

        let Some(bitmap) = bitmap else {
            return WorkerResponse {
                id,
                outcome: Err("No bitmap received".to_string()),
            };
        };

        let result = panic::catch_unwind(AssertUnwindSafe(move || match mode {
            ProcessMode::DistanceField => process::process_distance_field(bitmap, &settings),
            ProcessMode::Metallic { max_size } => process::process_metallic(bitmap, max_size),
        }));

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => Err(panic_message(payload.as_ref())),
        };

        WorkerResponse { id, outcome }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", msg)
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceProfile, FieldSettings, IconKind};

    fn settings() -> ProcessSettings {
        ProcessSettings {
            low_end: false,
            field: FieldSettings::for_profile(DeviceProfile::from_cores(8)),
        }
    }

    #[test]
    fn test_missing_bitmap_is_error_reply() {
        let response = WorkerRequest {
            id: 7,
            bitmap: None,
            mode: ProcessMode::DistanceField,
            low_end: false,
        }
        .run(&settings());

        assert_eq!(response.id, 7);
        assert_eq!(response.outcome.unwrap_err(), "No bitmap received");
    }

    #[test]
    fn test_reply_carries_request_id() {
        let bitmap = RasterBitmap::from_rgba(4, 4, vec![255; 64]);
        let response = WorkerRequest {
            id: 42,
            bitmap: Some(bitmap),
            mode: ProcessMode::metallic(),
            low_end: false,
        }
        .run(&settings());

        assert_eq!(response.id, 42);
        let icon = response.outcome.unwrap();
        assert_eq!(icon.kind, IconKind::AlphaMask);
        assert_eq!((icon.width, icon.height), (4, 4));
    }

    #[test]
    fn test_mismatched_buffer_is_error_not_panic() {
        let bitmap = RasterBitmap {
            width: 300,
            height: 300,
            pixels: vec![0; 16],
            target_size: 300,
            quality: crate::raster::ResizeQuality::Low,
        };
        let response = WorkerRequest {
            id: 1,
            bitmap: Some(bitmap),
            mode: ProcessMode::metallic(),
            low_end: false,
        }
        .run(&settings());

        assert!(response.outcome.is_err());
    }
}
