//! Frame pacing and resize debouncing for the render loop
//!
//! Both are pure state machines fed with timestamps (time since the loop
//! started), so they can be tested without a clock or a GPU.

use std::time::Duration;

use crate::state::RenderSettings;

/// Share of the frame time that must have elapsed before drawing again
const FRAME_TOLERANCE: f32 = 0.9;

/// What the loop should do on a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Not visible; nothing drawn
    Hidden,
    /// Dropped by the frame-skip counter
    Skipped,
    /// Too soon after the previous frame
    Throttled,
    /// Draw with this animation time (ms)
    Render { time_ms: f32 },
}

/// Decides which ticks become frames and advances the animation clock
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_skip: u32,
    min_frame_ms: f32,
    time_wrap_ms: f32,
    speed: f32,
    visible: bool,
    tick_count: u64,
    last_frame: Duration,
    total_time_ms: f32,
}

impl FramePacer {
    pub fn new(settings: &RenderSettings, speed: f32) -> Self {
        Self {
            frame_skip: settings.frame_skip,
            min_frame_ms: settings.frame_time().as_secs_f32() * 1000.0 * FRAME_TOLERANCE,
            time_wrap_ms: settings.time_wrap_ms.max(1.0),
            speed,
            visible: true,
            tick_count: 0,
            last_frame: Duration::ZERO,
            total_time_ms: 0.0,
        }
    }

    /// Becoming visible restarts the frame clock, so hidden time is not animated
    pub fn set_visible(&mut self, visible: bool, at: Duration) {
        if visible && !self.visible {
            self.last_frame = at;
        }
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Current animation time in ms, always below the wrap period
    pub fn time_ms(&self) -> f32 {
        self.total_time_ms
    }

    pub fn tick(&mut self, at: Duration) -> Tick {
        if !self.visible {
            return Tick::Hidden;
        }

        if self.frame_skip > 0 {
            self.tick_count += 1;
            if self.tick_count % (self.frame_skip as u64 + 1) != 0 {
                return Tick::Skipped;
            }
        }

        let delta_ms = at.saturating_sub(self.last_frame).as_secs_f32() * 1000.0;
        if delta_ms < self.min_frame_ms {
            return Tick::Throttled;
        }

        self.last_frame = at;
        self.total_time_ms = (self.total_time_ms + delta_ms * self.speed) % self.time_wrap_ms;
        Tick::Render {
            time_ms: self.total_time_ms,
        }
    }
}

/// Backing resolution for a CSS size and device pixel ratio
pub fn backing_size(base_size: u32, device_pixel_ratio: f32, dpr_cap: f32) -> u32 {
    let dpr = device_pixel_ratio.min(dpr_cap).max(0.0);
    ((base_size as f32 * dpr) as u32).max(1)
}

/// A resize that survived debouncing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeRequest {
    pub base_size: u32,
    pub device_pixel_ratio: f32,
}

/// Collapses bursts of resize events into the last one
#[derive(Debug, Clone)]
pub struct ResizeDebouncer {
    delay: Duration,
    pending: Option<(ResizeRequest, Duration)>,
}

impl ResizeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record a resize; any earlier pending one is replaced
    pub fn request(&mut self, request: ResizeRequest, at: Duration) {
        self.pending = Some((request, at + self.delay));
    }

    /// The pending resize, once its quiet period has passed
    pub fn poll(&mut self, at: Duration) -> Option<ResizeRequest> {
        match self.pending {
            Some((request, due)) if due <= at => {
                self.pending = None;
                Some(request)
            }
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeviceProfile;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn settings(low_end: bool) -> RenderSettings {
        let cores = if low_end { 2 } else { 8 };
        RenderSettings::for_profile(DeviceProfile::from_cores(cores))
    }

    #[test]
    fn test_fps_cap() {
        // 45 fps => 22.2 ms per frame, 20 ms with tolerance
        let mut pacer = FramePacer::new(&settings(false), 1.0);
        assert_eq!(pacer.tick(ms(10)), Tick::Throttled);
        assert!(matches!(pacer.tick(ms(21)), Tick::Render { .. }));
        assert_eq!(pacer.tick(ms(35)), Tick::Throttled);
        assert!(matches!(pacer.tick(ms(45)), Tick::Render { .. }));
    }

    #[test]
    fn test_frame_skip_on_constrained_device() {
        let mut pacer = FramePacer::new(&settings(true), 1.0);
        let mut rendered = Vec::new();
        // Ticks far enough apart that only frame skip applies
        for i in 1..=12u64 {
            if let Tick::Render { .. } = pacer.tick(ms(i * 100)) {
                rendered.push(i);
            }
        }
        assert_eq!(rendered, vec![4, 8, 12]);
    }

    #[test]
    fn test_time_advances_by_speed_and_wraps() {
        let mut pacer = FramePacer::new(&settings(false), 0.5);
        let Tick::Render { time_ms } = pacer.tick(ms(100)) else {
            panic!("expected a frame");
        };
        assert!((time_ms - 50.0).abs() < 0.01);

        let mut pacer = FramePacer::new(&settings(false), 1.0);
        pacer.tick(ms(11_000));
        let Tick::Render { time_ms } = pacer.tick(ms(13_000)) else {
            panic!("expected a frame");
        };
        assert!((time_ms - 1_000.0).abs() < 0.01);
        assert!(pacer.time_ms() < 12_000.0);
    }

    #[test]
    fn test_visibility_resets_clock() {
        let mut pacer = FramePacer::new(&settings(false), 1.0);
        pacer.tick(ms(100));
        let before = pacer.time_ms();

        pacer.set_visible(false, ms(150));
        assert_eq!(pacer.tick(ms(5_000)), Tick::Hidden);
        pacer.set_visible(true, ms(10_000));

        // Hidden time does not count
        assert_eq!(pacer.tick(ms(10_010)), Tick::Throttled);
        let Tick::Render { time_ms } = pacer.tick(ms(10_030)) else {
            panic!("expected a frame");
        };
        assert!((time_ms - before - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_backing_size() {
        assert_eq!(backing_size(96, 2.0, 1.25), 120);
        assert_eq!(backing_size(96, 1.0, 1.25), 96);
        assert_eq!(backing_size(64, 3.0, 1.0), 64);
        assert_eq!(backing_size(64, 0.0, 1.0), 1);
    }

    #[test]
    fn test_resize_debounce_keeps_last() {
        let mut debouncer = ResizeDebouncer::new(ms(250));
        let first = ResizeRequest {
            base_size: 64,
            device_pixel_ratio: 1.0,
        };
        let last = ResizeRequest {
            base_size: 96,
            device_pixel_ratio: 2.0,
        };

        debouncer.request(first, ms(0));
        debouncer.request(last, ms(100));
        assert_eq!(debouncer.poll(ms(300)), None);
        assert_eq!(debouncer.poll(ms(350)), Some(last));
        assert_eq!(debouncer.poll(ms(400)), None);
        assert!(!debouncer.is_pending());
    }
}
