//! Device detection and pipeline configuration
//!
//! Every tunable of the pipeline is derived from a [`DeviceProfile`]:
//! constrained devices (four or fewer logical cores, or a mobile user agent)
//! get smaller caches, fewer workers, cheaper distance fields and a lower
//! frame rate. The whole config can be overridden from a JSON file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ConfigError;
use crate::queue::DrainPolicy;

/// User agents treated as mobile
const MOBILE_PATTERN: &str = r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini";

/// Devices with this many logical cores or fewer count as low-end
const LOW_END_MAX_CORES: usize = 4;

fn mobile_regex() -> &'static Regex {
    static MOBILE: OnceLock<Regex> = OnceLock::new();
    MOBILE.get_or_init(|| Regex::new(MOBILE_PATTERN).expect("mobile pattern is valid"))
}

/// Check a user agent string against the mobile pattern
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    mobile_regex().is_match(user_agent)
}

/// Hardware class of the machine running the pipeline
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Constrained device: cheaper processing and rendering everywhere
    pub low_end: bool,
    /// Logical CPU cores available
    pub logical_cores: usize,
}

impl DeviceProfile {
    /// Detect the profile of the current machine
    pub fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self::from_cores(logical_cores)
    }

    /// Profile from a core count alone
    pub fn from_cores(logical_cores: usize) -> Self {
        Self {
            low_end: logical_cores <= LOW_END_MAX_CORES,
            logical_cores,
        }
    }

    /// Profile from a browser user agent and its reported core count
    pub fn from_user_agent(user_agent: &str, logical_cores: usize) -> Self {
        Self {
            low_end: logical_cores <= LOW_END_MAX_CORES || is_mobile_user_agent(user_agent),
            logical_cores,
        }
    }
}

/// Distance-field (logo) processing settings
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FieldSettings {
    /// Lower bound of the working resolution
    pub min_size: u32,
    /// Upper bound of the working resolution
    pub max_size: u32,
    /// Jacobi relaxation passes
    pub iterations: u32,
    /// Alpha above this value counts as shape
    pub alpha_threshold: u8,
    /// Source term `C` of the relaxation
    pub source_term: f32,
}

impl FieldSettings {
    pub fn for_profile(profile: DeviceProfile) -> Self {
        if profile.low_end {
            Self {
                min_size: 112,
                max_size: 224,
                iterations: 40,
                alpha_threshold: 20,
                source_term: 0.01,
            }
        } else {
            Self {
                min_size: 160,
                max_size: 320,
                iterations: 65,
                alpha_threshold: 20,
                source_term: 0.01,
            }
        }
    }
}

/// Shader renderer settings
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Frame-rate cap of the animation loop
    pub max_fps: f32,
    /// Ticks skipped between rendered frames
    pub frame_skip: u32,
    /// Upper bound for the device pixel ratio
    pub dpr_cap: f32,
    /// Backing resolution before DPR scaling
    pub base_size: u32,
    /// Resize events closer together than this collapse into one
    pub resize_debounce_ms: u64,
    /// Animation time wraps at this period
    pub time_wrap_ms: f32,
    /// Tick rate of the frame clock (display refresh)
    pub refresh_hz: f32,
    /// Ask for a low-power GPU adapter
    pub low_power: bool,
    /// Generate a mip chain for the icon texture
    pub mipmaps: bool,
}

impl RenderSettings {
    pub fn for_profile(profile: DeviceProfile) -> Self {
        Self {
            max_fps: if profile.low_end { 20.0 } else { 45.0 },
            frame_skip: if profile.low_end { 3 } else { 0 },
            dpr_cap: if profile.low_end { 1.0 } else { 1.25 },
            base_size: if profile.low_end { 64 } else { 96 },
            resize_debounce_ms: 250,
            time_wrap_ms: 12_000.0,
            refresh_hz: 60.0,
            low_power: profile.low_end,
            mipmaps: !profile.low_end,
        }
    }

    /// Minimum time between two rendered frames
    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.max_fps.max(1.0))
    }

    /// Interval of the frame clock
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.refresh_hz.max(1.0))
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

/// Complete configuration of the icon pipeline
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub profile: DeviceProfile,
    /// Maximum number of cached results
    pub cache_capacity: usize,
    /// Background worker threads
    pub worker_count: usize,
    /// Raster size of the distance-field path
    pub raster_size: u32,
    /// Default size of the metallic path
    pub metallic_size: u32,
    /// Load budget of the distance-field path
    pub raster_timeout_ms: u64,
    /// Load budget of the metallic path
    pub metallic_timeout_ms: u64,
    /// Time a worker has to answer a submission
    pub worker_timeout_ms: u64,
    pub field: FieldSettings,
    pub drain: DrainPolicy,
    pub render: RenderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_profile(DeviceProfile::detect())
    }
}

impl PipelineConfig {
    /// Derive every setting from the device profile
    pub fn for_profile(profile: DeviceProfile) -> Self {
        let low_end = profile.low_end;
        let max_workers = if low_end { 2 } else { 3 };

        Self {
            profile,
            cache_capacity: if low_end { 35 } else { 45 },
            worker_count: profile.logical_cores.clamp(1, max_workers),
            raster_size: if low_end { 192 } else { 256 },
            metallic_size: if low_end { 64 } else { 96 },
            raster_timeout_ms: 10_000,
            metallic_timeout_ms: 5_000,
            worker_timeout_ms: 30_000,
            field: FieldSettings::for_profile(profile),
            drain: DrainPolicy::for_profile(profile),
            render: RenderSettings::for_profile(profile),
        }
    }

    pub fn raster_timeout(&self) -> Duration {
        Duration::from_millis(self.raster_timeout_ms)
    }

    pub fn metallic_timeout(&self) -> Duration {
        Duration::from_millis(self.metallic_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a config file; missing fields fall back to the detected profile
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_user_agent_is_low_end() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
        let profile = DeviceProfile::from_user_agent(ua, 8);
        assert!(profile.low_end);
    }

    #[test]
    fn test_desktop_user_agent_with_many_cores() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0";
        assert!(!DeviceProfile::from_user_agent(ua, 16).low_end);
        assert!(DeviceProfile::from_user_agent(ua, 4).low_end);
    }

    #[test]
    fn test_constrained_profile_settings() {
        let config = PipelineConfig::for_profile(DeviceProfile::from_cores(4));
        assert_eq!(config.cache_capacity, 35);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.field.iterations, 40);
        assert_eq!(config.field.max_size, 224);
        assert_eq!(config.render.max_fps, 20.0);
        assert_eq!(config.render.frame_skip, 3);
        assert_eq!(config.metallic_size, 64);
    }

    #[test]
    fn test_capable_profile_settings() {
        let config = PipelineConfig::for_profile(DeviceProfile::from_cores(12));
        assert_eq!(config.cache_capacity, 45);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.field.iterations, 65);
        assert_eq!(config.field.min_size, 160);
        assert_eq!(config.render.max_fps, 45.0);
        assert_eq!(config.render.dpr_cap, 1.25);
    }

    #[test]
    fn test_worker_count_never_exceeds_cores() {
        let config = PipelineConfig::for_profile(DeviceProfile {
            low_end: false,
            logical_cores: 1,
        });
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = PipelineConfig::for_profile(DeviceProfile::from_cores(8));
        let json = config.to_json().unwrap();
        let restored = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(config, restored);
    }
}
