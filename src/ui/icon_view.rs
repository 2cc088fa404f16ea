//! Per-icon display state
//!
//! An [`IconView`] starts processing the first time it becomes visible,
//! then waits for the result without blocking. Every source change or
//! unmount bumps a generation counter; results carrying an older
//! generation are dropped, so a slow load can never overwrite a newer one.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::{PipelineError, Result};
use crate::pipeline::IconPipeline;
use crate::state::{ProcessedIcon, ShaderParams, Theme};

/// Which processing path a view uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconVariant {
    /// Distance-field logo (skills grid)
    Logo,
    /// Alpha-inverted small icon; `None` picks the device default size
    Metallic { size: Option<u32> },
}

/// What the view currently shows
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// Not visible yet; nothing requested
    Idle,
    /// Skeleton while processing runs
    Loading,
    Ready(Arc<ProcessedIcon>),
    /// Placeholder; no automatic retry
    Failed(PipelineError),
}

type Pending = (u64, oneshot::Receiver<Result<Arc<ProcessedIcon>>>);

#[derive(Debug)]
pub struct IconView {
    source: String,
    variant: IconVariant,
    params: ShaderParams,
    state: ViewState,
    generation: u64,
    triggered: bool,
    mounted: bool,
    pending: Option<Pending>,
}

impl IconView {
    pub fn new(source: impl Into<String>, variant: IconVariant, params: ShaderParams) -> Self {
        Self {
            source: source.into(),
            variant,
            params,
            state: ViewState::Idle,
            generation: 0,
            triggered: false,
            mounted: true,
            pending: None,
        }
    }

    /// Skill-grid logo with the theme's animation speed
    pub fn logo(source: impl Into<String>, theme: Theme) -> Self {
        Self::new(source, IconVariant::Logo, ShaderParams::skill_icon(theme))
    }

    /// Small metallic icon at the device default size
    pub fn metallic(source: impl Into<String>) -> Self {
        Self::new(
            source,
            IconVariant::Metallic { size: None },
            ShaderParams::small_icon(),
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn params(&self) -> &ShaderParams {
        &self.params
    }

    /// Theme switches only change the animation speed of logos
    pub fn set_theme(&mut self, theme: Theme) {
        if self.variant == IconVariant::Logo {
            self.params = ShaderParams::skill_icon(theme);
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Viewport notification; the first visible one starts processing
    pub fn on_visibility(&mut self, pipeline: &Arc<IconPipeline>, visible: bool) {
        if !visible || self.triggered || !self.mounted {
            return;
        }
        self.triggered = true;
        self.start(pipeline);
    }

    /// Point the view at another icon
    pub fn set_source(&mut self, pipeline: &Arc<IconPipeline>, source: impl Into<String>) {
        let source = source.into();
        if source == self.source {
            return;
        }
        self.source = source;
        self.generation += 1;
        self.pending = None;

        if self.triggered && self.mounted {
            self.start(pipeline);
        } else {
            self.state = ViewState::Idle;
        }
    }

    /// Detach the view; late results are ignored
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.generation += 1;
        self.pending = None;
    }

    /// Apply a finished result, if any. Returns whether the state changed.
    pub fn pump(&mut self) -> bool {
        let Some((generation, mut receiver)) = self.pending.take() else {
            return false;
        };

        match receiver.try_recv() {
            Ok(result) => self.apply(generation, result),
            Err(oneshot::error::TryRecvError::Empty) => {
                self.pending = Some((generation, receiver));
                false
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                self.apply(generation, Err(PipelineError::Cancelled))
            }
        }
    }

    fn start(&mut self, pipeline: &Arc<IconPipeline>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(icon = %self.source, "no async runtime, icon not loaded");
            self.pending = None;
            self.state = ViewState::Failed(PipelineError::Cancelled);
            return;
        };

        let (tx, rx) = oneshot::channel();
        let pipeline = Arc::clone(pipeline);
        let source = self.source.clone();
        let variant = self.variant;

        runtime.spawn(async move {
            let result = match variant {
                IconVariant::Logo => pipeline.process_for_distance_field(&source).await,
                IconVariant::Metallic { size } => pipeline.process_for_metallic(&source, size).await,
            };
            let _ = tx.send(result);
        });

        self.pending = Some((self.generation, rx));
        self.state = ViewState::Loading;
    }

    fn apply(&mut self, generation: u64, result: Result<Arc<ProcessedIcon>>) -> bool {
        if generation != self.generation || !self.mounted {
            tracing::debug!(icon = %self.source, "dropping stale icon result");
            return false;
        }

        self.state = match result {
            Ok(icon) => ViewState::Ready(icon),
            Err(e) => {
                tracing::warn!(icon = %self.source, error = %e, "icon processing failed");
                ViewState::Failed(e)
            }
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::FsFetcher;
    use crate::state::{DeviceProfile, IconKind, PipelineConfig};
    use std::time::{Duration, Instant};

    const SQUARE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64"><rect width="64" height="64" fill="#000"/></svg>"##;

    fn pipeline(dir: &tempfile::TempDir) -> Arc<IconPipeline> {
        std::fs::write(dir.path().join("a.svg"), SQUARE_SVG).unwrap();
        std::fs::write(dir.path().join("b.svg"), SQUARE_SVG).unwrap();
        let config = PipelineConfig::for_profile(DeviceProfile::from_cores(8));
        IconPipeline::new(config, Arc::new(FsFetcher::new(dir.path())))
    }

    async fn pump_until_settled(view: &mut IconView) {
        let start = Instant::now();
        while !view.pump() {
            assert!(start.elapsed() < Duration::from_secs(20), "view never settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn icon() -> Arc<ProcessedIcon> {
        Arc::new(ProcessedIcon {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
            kind: IconKind::AlphaMask,
            png: None,
        })
    }

    #[test]
    fn test_stale_result_is_dropped() {
        let mut view = IconView::metallic("a.svg");
        view.generation = 3;
        assert!(!view.apply(2, Ok(icon())));
        assert_eq!(view.state(), &ViewState::Idle);

        assert!(view.apply(3, Ok(icon())));
        assert!(matches!(view.state(), ViewState::Ready(_)));
    }

    #[test]
    fn test_result_after_unmount_is_dropped() {
        let mut view = IconView::metallic("a.svg");
        let generation = view.generation;
        view.unmount();
        assert!(!view.apply(generation, Ok(icon())));
        assert!(!view.apply(view.generation, Ok(icon())));
        assert_eq!(view.state(), &ViewState::Idle);
    }

    #[tokio::test]
    async fn test_loads_when_first_visible() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);
        let mut view = IconView::metallic("a.svg");

        view.on_visibility(&pipeline, false);
        assert_eq!(view.state(), &ViewState::Idle);

        view.on_visibility(&pipeline, true);
        assert_eq!(view.state(), &ViewState::Loading);
        pump_until_settled(&mut view).await;

        let ViewState::Ready(icon) = view.state() else {
            panic!("expected a ready icon, got {:?}", view.state());
        };
        assert_eq!(icon.width, pipeline.metallic_size());
        assert!(!view.pump());
    }

    #[tokio::test]
    async fn test_source_change_discards_old_load() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);
        let mut view = IconView::logo("a.svg", Theme::Dark);

        view.on_visibility(&pipeline, true);
        view.set_source(&pipeline, "missing.svg");
        pump_until_settled(&mut view).await;

        // Only the newer source's outcome is applied
        assert!(matches!(
            view.state(),
            ViewState::Failed(PipelineError::LoadError { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_shows_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);
        let mut view = IconView::metallic("");

        view.on_visibility(&pipeline, true);
        pump_until_settled(&mut view).await;
        assert_eq!(view.state(), &ViewState::Failed(PipelineError::EmptySource));
    }

    #[test]
    fn test_visible_without_runtime_fails_instead_of_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir);
        let mut view = IconView::metallic("a.svg");

        view.on_visibility(&pipeline, true);
        assert_eq!(view.state(), &ViewState::Failed(PipelineError::Cancelled));
        assert!(!view.pump());

        view.set_source(&pipeline, "b.svg");
        assert_eq!(view.state(), &ViewState::Failed(PipelineError::Cancelled));
    }

    #[test]
    fn test_theme_changes_logo_speed() {
        let mut view = IconView::logo("a.svg", Theme::Dark);
        assert_eq!(view.params().speed, 0.25);
        view.set_theme(Theme::Light);
        assert_eq!(view.params().speed, 0.12);

        let mut metallic = IconView::metallic("a.svg");
        metallic.set_theme(Theme::Light);
        assert_eq!(metallic.params().speed, 0.15);
    }
}
