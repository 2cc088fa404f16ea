//! Animation loop driving a renderer from a tokio interval
//!
//! The loop owns its sink. Hosts talk to it through a [`RenderHandle`]:
//! visibility, resizes and speed changes travel as commands, the loop state
//! comes back through a watch channel. Stopping the loop (or a sink error)
//! releases the sink's GPU resources on the loop task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::pacing::{FramePacer, ResizeDebouncer, ResizeRequest, Tick};
use super::renderer::MetallicRenderer;
use crate::error::RenderError;
use crate::state::RenderSettings;

/// Something the loop can draw into
pub trait FrameSink: Send + 'static {
    fn draw(&mut self, time_ms: f32) -> Result<(), RenderError>;

    /// Returns the new backing size
    fn resize(&mut self, base_size: u32, device_pixel_ratio: f32) -> Result<u32, RenderError>;

    fn release(&mut self);
}

impl FrameSink for MetallicRenderer {
    fn draw(&mut self, time_ms: f32) -> Result<(), RenderError> {
        MetallicRenderer::draw(self, time_ms)
    }

    fn resize(&mut self, base_size: u32, device_pixel_ratio: f32) -> Result<u32, RenderError> {
        MetallicRenderer::resize(self, base_size, device_pixel_ratio)
    }

    fn release(&mut self) {
        MetallicRenderer::release(self)
    }
}

/// Observable state of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Hidden; ticks are ignored
    Paused,
    /// The sink reported an error; the loop ended
    Failed,
    Stopped,
}

#[derive(Debug)]
enum Command {
    Visible(bool),
    Resize(ResizeRequest),
    Speed(f32),
    Stop,
}

/// Spawns animation loops
pub struct RenderLoop;

impl RenderLoop {
    /// Start animating `sink` on the current runtime
    pub fn spawn<S: FrameSink>(sink: S, settings: RenderSettings, speed: f32) -> RenderHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LoopState::Running);
        let frames = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            sink,
            settings,
            speed,
            receiver,
            state_tx,
            Arc::clone(&frames),
        ));

        RenderHandle {
            commands,
            state,
            frames,
            task: Some(task),
        }
    }
}

async fn run<S: FrameSink>(
    mut sink: S,
    settings: RenderSettings,
    speed: f32,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<LoopState>,
    frames: Arc<AtomicU64>,
) {
    let start = Instant::now();
    let mut pacer = FramePacer::new(&settings, speed);
    let mut debouncer = ResizeDebouncer::new(settings.resize_debounce());
    let mut interval = tokio::time::interval(settings.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let failure = loop {
        tokio::select! {
            _ = interval.tick() => {
                let at = start.elapsed();

                if let Some(request) = debouncer.poll(at) {
                    if let Err(e) = sink.resize(request.base_size, request.device_pixel_ratio) {
                        break Some(e);
                    }
                }

                if let Tick::Render { time_ms } = pacer.tick(at) {
                    if let Err(e) = sink.draw(time_ms) {
                        break Some(e);
                    }
                    frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Visible(visible)) => {
                    pacer.set_visible(visible, start.elapsed());
                    state.send_replace(if visible { LoopState::Running } else { LoopState::Paused });
                }
                Some(Command::Resize(request)) => debouncer.request(request, start.elapsed()),
                Some(Command::Speed(speed)) => pacer.set_speed(speed),
                Some(Command::Stop) | None => break None,
            }
        }
    };

    sink.release();

    match failure {
        Some(e) => {
            tracing::error!(error = %e, "render loop stopped");
            state.send_replace(LoopState::Failed);
        }
        None => {
            tracing::debug!(frames = frames.load(Ordering::Relaxed), "render loop stopped");
            state.send_replace(LoopState::Stopped);
        }
    }
}

/// Control side of a running loop
pub struct RenderHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LoopState>,
    frames: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl RenderHandle {
    pub fn set_visible(&self, visible: bool) {
        let _ = self.commands.send(Command::Visible(visible));
    }

    /// Debounced; only the last resize in a burst reaches the sink
    pub fn resize(&self, base_size: u32, device_pixel_ratio: f32) {
        let _ = self.commands.send(Command::Resize(ResizeRequest {
            base_size,
            device_pixel_ratio,
        }));
    }

    pub fn set_speed(&self, speed: f32) {
        let _ = self.commands.send(Command::Speed(speed));
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Frames drawn so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait until the sink is released
    pub async fn stop(mut self) -> LoopState {
        let _ = self.commands.send(Command::Stop);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "render loop task ended abnormally");
            }
        }
        self.state()
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeviceProfile;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        draws: Vec<f32>,
        resizes: Vec<(u32, f32)>,
        released: bool,
    }

    #[derive(Clone, Default)]
    struct FakeSink {
        recorded: Arc<Mutex<Recorded>>,
        fail_after: Option<usize>,
    }

    impl FrameSink for FakeSink {
        fn draw(&mut self, time_ms: f32) -> Result<(), RenderError> {
            let mut recorded = self.recorded.lock();
            if self.fail_after.is_some_and(|n| recorded.draws.len() >= n) {
                return Err(RenderError::NotReady("lost context"));
            }
            recorded.draws.push(time_ms);
            Ok(())
        }

        fn resize(&mut self, base_size: u32, device_pixel_ratio: f32) -> Result<u32, RenderError> {
            self.recorded.lock().resizes.push((base_size, device_pixel_ratio));
            Ok(base_size)
        }

        fn release(&mut self) {
            self.recorded.lock().released = true;
        }
    }

    fn settings() -> RenderSettings {
        RenderSettings::for_profile(DeviceProfile::from_cores(8))
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_draws_and_stops() {
        let sink = FakeSink::default();
        let recorded = Arc::clone(&sink.recorded);
        let handle = RenderLoop::spawn(sink, settings(), 1.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let drawn = recorded.lock().draws.len();
        // 45 fps cap on a 60 Hz clock
        assert!((20..=46).contains(&drawn), "drew {} frames", drawn);
        assert_eq!(handle.frames(), drawn as u64);

        // Animation time grows monotonically within the wrap period
        let draws = recorded.lock().draws.clone();
        assert!(draws.windows(2).all(|w| w[1] > w[0]));

        assert_eq!(handle.stop().await, LoopState::Stopped);
        assert!(recorded.lock().released);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_loop_does_not_draw() {
        let sink = FakeSink::default();
        let recorded = Arc::clone(&sink.recorded);
        let handle = RenderLoop::spawn(sink, settings(), 1.0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.set_visible(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), LoopState::Paused);

        let before = recorded.lock().draws.len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorded.lock().draws.len(), before);

        let last_time = *recorded.lock().draws.last().unwrap();
        handle.set_visible(true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.state(), LoopState::Running);

        // The hidden two seconds are not animated
        let resumed = *recorded.lock().draws.last().unwrap();
        assert!(resumed > last_time);
        assert!(resumed - last_time < 400.0);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resizes_are_debounced() {
        let sink = FakeSink::default();
        let recorded = Arc::clone(&sink.recorded);
        let handle = RenderLoop::spawn(sink, settings(), 1.0);

        handle.resize(64, 1.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.resize(80, 1.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.resize(96, 2.0);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(recorded.lock().resizes, vec![(96, 2.0)]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_fails_loop() {
        let sink = FakeSink {
            fail_after: Some(3),
            ..Default::default()
        };
        let recorded = Arc::clone(&sink.recorded);
        let handle = RenderLoop::spawn(sink, settings(), 1.0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), LoopState::Failed);
        assert_eq!(recorded.lock().draws.len(), 3);
        assert!(recorded.lock().released);
        assert_eq!(handle.stop().await, LoopState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change() {
        let sink = FakeSink::default();
        let recorded = Arc::clone(&sink.recorded);
        let handle = RenderLoop::spawn(sink, settings(), 0.0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(recorded.lock().draws.iter().all(|&t| t == 0.0));

        handle.set_speed(1.0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(*recorded.lock().draws.last().unwrap() > 0.0);
        handle.stop().await;
    }
}
