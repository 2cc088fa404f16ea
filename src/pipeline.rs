//! Icon processing orchestrator
//!
//! Ties the rasterizer, the worker pool, the result cache and the preload
//! queue together. Requests for the same cache key coalesce: the first
//! caller spawns the job and every caller waits on its own oneshot for the
//! shared outcome, so dropping one caller's future cancels nothing.
//!
//! Lock order is `in_flight`, then `cache`, then `queue`.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::cache::IconCache;
use crate::error::{PipelineError, Result};
use crate::queue::{drain_slice, Priority, PriorityQueue, SlotDeadline};
use crate::raster::{default_fetcher, AssetFetcher, RasterBitmap, Rasterizer, ResizeQuality};
use crate::state::data::metallic_cache_key;
use crate::state::{PipelineConfig, ProcessedIcon};
use crate::worker::{ProcessMode, WorkerPool};

type SharedOutcome = Result<Arc<ProcessedIcon>>;

/// What to produce for a source
#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    DistanceField { source: String },
    Metallic { source: String, size: u32 },
}

impl Job {
    fn key(&self) -> String {
        match self {
            Job::DistanceField { source } => source.clone(),
            Job::Metallic { source, size } => metallic_cache_key(source, *size),
        }
    }

    fn source(&self) -> &str {
        match self {
            Job::DistanceField { source } | Job::Metallic { source, .. } => source,
        }
    }
}

/// Snapshot of the pipeline's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub cached: usize,
    pub queued: usize,
    pub in_flight: usize,
    /// Preloads taken off the queue and not finished yet
    pub preloading: usize,
    pub workers: usize,
}

/// Shared entry point for icon processing
pub struct IconPipeline {
    config: PipelineConfig,
    rasterizer: Rasterizer,
    cache: Mutex<IconCache>,
    queue: Mutex<PriorityQueue>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    in_flight: Mutex<HashMap<String, Vec<oneshot::Sender<SharedOutcome>>>>,
    draining: AtomicBool,
    drain_runs: AtomicUsize,
    preloading: AtomicUsize,
    closed: AtomicBool,
}

static GLOBAL: OnceLock<Arc<IconPipeline>> = OnceLock::new();

impl IconPipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn AssetFetcher>) -> Arc<Self> {
        tracing::info!(
            low_end = config.profile.low_end,
            cache = config.cache_capacity,
            workers = config.worker_count,
            "icon pipeline created"
        );

        Arc::new(Self {
            cache: Mutex::new(IconCache::new(config.cache_capacity)),
            queue: Mutex::new(PriorityQueue::new()),
            rasterizer: Rasterizer::new(fetcher),
            pool: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            drain_runs: AtomicUsize::new(0),
            preloading: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Detected device profile, assets below the working directory
    pub fn with_defaults() -> Arc<Self> {
        Self::new(PipelineConfig::default(), default_fetcher(PathBuf::from(".")))
    }

    /// Process-wide pipeline, created on first use
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(Self::with_defaults))
    }

    /// Shut the process-wide pipeline down, if it was ever created
    pub fn shutdown_global() {
        if let Some(pipeline) = GLOBAL.get() {
            pipeline.shutdown();
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Default size of the metallic path for this device
    pub fn metallic_size(&self) -> u32 {
        self.config.metallic_size
    }

    /// Distance field of a logo, cached under its source
    pub async fn process_for_distance_field(
        self: &Arc<Self>,
        source: &str,
    ) -> Result<Arc<ProcessedIcon>> {
        self.process(Job::DistanceField {
            source: source.to_string(),
        })
        .await
    }

    /// Alpha-inverted icon for the metallic shader, cached per size
    pub async fn process_for_metallic(
        self: &Arc<Self>,
        source: &str,
        size: Option<u32>,
    ) -> Result<Arc<ProcessedIcon>> {
        let size = size.unwrap_or_else(|| self.metallic_size());
        self.process(Job::Metallic {
            source: source.to_string(),
            size,
        })
        .await
    }

    /// Queue sources for background processing
    ///
    /// Cached sources are skipped, queued ones are promoted at most.
    pub fn preload<I, S>(self: &Arc<Self>, sources: I, priority: Priority)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_shut_down() {
            return;
        }

        {
            let cache = self.cache.lock();
            let mut queue = self.queue.lock();
            for source in sources {
                let source = source.into();
                if source.is_empty() || cache.contains(&source) {
                    continue;
                }
                queue.add(source, priority);
            }
        }

        self.ensure_drain();
    }

    /// Put a source at the front of the queue and process it right away
    pub async fn process_high_priority(
        self: &Arc<Self>,
        source: &str,
    ) -> Result<Arc<ProcessedIcon>> {
        self.preload([source], Priority::High);
        self.process_for_distance_field(source).await
    }

    /// Submit a bitmap to an existing pool
    ///
    /// Unlike the processing calls this never creates the pool.
    pub async fn submit_bitmap(
        &self,
        bitmap: RasterBitmap,
        mode: ProcessMode,
    ) -> Result<ProcessedIcon> {
        let pool = self.pool.lock().clone();
        match pool {
            Some(pool) => pool.submit(bitmap, mode).await,
            None if self.is_shut_down() => Err(PipelineError::ShutDown),
            None => Err(PipelineError::PoolUninitialized),
        }
    }

    /// Stop the workers and drop all state; later calls fail with `ShutDown`
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(pool) = self.pool.lock().take() {
            pool.terminate();
        }

        let waiters: Vec<_> = self.in_flight.lock().drain().collect();
        for (_, senders) in waiters {
            for tx in senders {
                let _ = tx.send(Err(PipelineError::ShutDown));
            }
        }

        self.cache.lock().clear();
        self.queue.lock().clear();
        tracing::info!("icon pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Each lock is released before the next one is taken
    pub fn stats(&self) -> PipelineStats {
        let in_flight = self.in_flight.lock().len();
        let cached = self.cache.lock().len();
        let queued = self.queue.lock().len();
        let workers = self
            .pool
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.worker_count());

        PipelineStats {
            cached,
            queued,
            in_flight,
            preloading: self.preloading.load(Ordering::Acquire),
            workers,
        }
    }

    /// Cached result without counting an access
    pub fn cached(&self, key: &str) -> Option<Arc<ProcessedIcon>> {
        self.cache.lock().peek(key).cloned()
    }

    async fn process(self: &Arc<Self>, job: Job) -> Result<Arc<ProcessedIcon>> {
        if job.source().is_empty() {
            return Err(PipelineError::EmptySource);
        }
        if self.is_shut_down() {
            return Err(PipelineError::ShutDown);
        }

        let key = job.key();
        let (tx, rx) = oneshot::channel();
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(hit) = self.cache.lock().get(&key) {
                return Ok(hit);
            }

            match in_flight.entry(key.clone()) {
                Entry::Occupied(mut waiters) => {
                    tracing::debug!(key = %key, "joining in-flight job");
                    waiters.get_mut().push(tx);
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![tx]);
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.lead(key, job).await });
                }
            }
        }

        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Run a job and hand its outcome to every waiter
    async fn lead(self: Arc<Self>, key: String, job: Job) {
        let started = Instant::now();
        let outcome = self.run(&job).await.map(Arc::new);

        match &outcome {
            Ok(icon) => tracing::debug!(
                key = %key,
                width = icon.width,
                height = icon.height,
                elapsed = ?started.elapsed(),
                "icon processed"
            ),
            Err(e) => tracing::debug!(key = %key, error = %e, "icon processing failed"),
        }

        let waiters = {
            let mut in_flight = self.in_flight.lock();
            if let Ok(icon) = &outcome {
                if !self.is_shut_down() {
                    self.cache.lock().set(key.clone(), Arc::clone(icon));
                }
            }
            in_flight.remove(&key).unwrap_or_default()
        };

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }

    async fn run(&self, job: &Job) -> Result<ProcessedIcon> {
        let low_end = self.config.profile.low_end;

        let (bitmap, mode) = match job {
            Job::DistanceField { source } => {
                let bitmap = self
                    .rasterizer
                    .rasterize(
                        source,
                        self.config.raster_size,
                        ResizeQuality::for_device(low_end, ResizeQuality::Low),
                        self.config.raster_timeout(),
                    )
                    .await?;
                (bitmap, ProcessMode::DistanceField)
            }
            Job::Metallic { source, size } => {
                let bitmap = self
                    .rasterizer
                    .rasterize(
                        source,
                        *size,
                        ResizeQuality::for_device(low_end, ResizeQuality::Medium),
                        self.config.metallic_timeout(),
                    )
                    .await?;
                (bitmap, ProcessMode::Metallic { max_size: *size })
            }
        };

        let pool = self.ensure_pool()?;
        pool.submit(bitmap, mode).await
    }

    fn ensure_pool(&self) -> Result<Arc<WorkerPool>> {
        let mut pool = self.pool.lock();
        if self.is_shut_down() {
            return Err(PipelineError::ShutDown);
        }
        if let Some(pool) = pool.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let created = Arc::new(WorkerPool::spawn(&self.config)?);
        *pool = Some(Arc::clone(&created));
        Ok(created)
    }

    /// Start the idle drain unless one is already running
    fn ensure_drain(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, preload items stay queued");
            return;
        };
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }

        let this = Arc::clone(self);
        runtime.spawn(async move { this.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        let policy = self.config.drain;
        self.drain_runs.fetch_add(1, Ordering::Relaxed);

        loop {
            loop {
                tokio::time::sleep(policy.slot_delay()).await;
                if self.is_shut_down() {
                    break;
                }

                let deadline = SlotDeadline::new(policy.slot_budget());
                let mut batch = Vec::new();
                let remaining = {
                    let mut queue = self.queue.lock();
                    drain_slice(&mut queue, &deadline, &policy, |source| batch.push(source));
                    self.preloading.fetch_add(batch.len(), Ordering::AcqRel);
                    queue.len()
                };

                for source in batch {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.process_for_distance_field(&source).await {
                            tracing::warn!(icon = %source, error = %e, "preload failed");
                        }
                        this.preloading.fetch_sub(1, Ordering::AcqRel);
                    });
                }

                if remaining == 0 {
                    break;
                }
            }

            if !self.finish_drain() {
                break;
            }
        }
    }

    /// Release the drain flag. Returns true when work was queued after the
    /// last slice and this drain took the flag back to handle it.
    fn finish_drain(&self) -> bool {
        self.draining.store(false, Ordering::Release);

        // An enqueue racing the flag reset would otherwise be stranded
        if self.is_shut_down() || self.queue.lock().is_empty() {
            return false;
        }
        !self.draining.swap(true, Ordering::AcqRel)
    }
}

impl Drop for IconPipeline {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.get_mut().take() {
            pool.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::FsFetcher;
    use crate::state::{DeviceProfile, IconKind};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const SQUARE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64"><rect width="64" height="64" fill="#000"/></svg>"##;

    struct CountingFetcher {
        files: FsFetcher,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for CountingFetcher {
        async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.files.fetch(source).await
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        fetcher: Arc<CountingFetcher>,
        pipeline: Arc<IconPipeline>,
    }

    impl Fixture {
        fn fetches(&self) -> usize {
            self.fetcher.fetches.load(Ordering::SeqCst)
        }
    }

    fn fixture(icons: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for name in icons {
            std::fs::write(dir.path().join(name), SQUARE_SVG).unwrap();
        }

        let mut config = PipelineConfig::for_profile(DeviceProfile::from_cores(8));
        config.raster_size = 160;

        let fetcher = Arc::new(CountingFetcher {
            files: FsFetcher::new(dir.path()),
            fetches: AtomicUsize::new(0),
        });
        let pipeline = IconPipeline::new(config, fetcher.clone());
        Fixture {
            _dir: dir,
            fetcher,
            pipeline,
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(20), "timed out waiting");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_square_svg_distance_field() {
        let fx = fixture(&["square.svg"]);
        let icon = fx
            .pipeline
            .process_for_distance_field("square.svg")
            .await
            .unwrap();

        assert_eq!((icon.width, icon.height), (160, 160));
        assert_eq!(icon.kind, IconKind::DistanceField);
        assert_eq!(icon.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(icon.pixel(159, 80), [255, 255, 255, 255]);

        let center = icon.pixel(80, 80)[0];
        let darkest = icon.pixels.chunks_exact(4).map(|px| px[0]).min().unwrap();
        assert_eq!(center, darkest);
        assert!(icon.png.is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_result() {
        let fx = fixture(&["square.svg"]);
        let first = fx
            .pipeline
            .process_for_distance_field("square.svg")
            .await
            .unwrap();
        let second = fx
            .pipeline
            .process_for_distance_field("square.svg")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_job() {
        let fx = fixture(&["square.svg"]);
        let (a, b) = tokio::join!(
            fx.pipeline.process_for_distance_field("square.svg"),
            fx.pipeline.process_for_distance_field("square.svg"),
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fx.fetches(), 1);
        assert_eq!(fx.pipeline.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let fx = fixture(&[]);
        let err = fx.pipeline.process_for_distance_field("").await.unwrap_err();
        assert_eq!(err, PipelineError::EmptySource);
    }

    #[tokio::test]
    async fn test_metallic_cached_per_size() {
        let fx = fixture(&["square.svg"]);
        let icon = fx
            .pipeline
            .process_for_metallic("square.svg", Some(64))
            .await
            .unwrap();

        assert_eq!((icon.width, icon.height), (64, 64));
        assert_eq!(icon.kind, IconKind::AlphaMask);
        // Opaque square: red inverted to zero
        assert_eq!(icon.pixel(32, 32)[0], 0);
        assert!(fx.pipeline.cached("metallic_64_square.svg").is_some());
        assert!(fx.pipeline.cached("square.svg").is_none());

        let default_size = fx
            .pipeline
            .process_for_metallic("square.svg", None)
            .await
            .unwrap();
        assert_eq!(default_size.width, fx.pipeline.metallic_size());
        assert_eq!(fx.fetches(), 2);
    }

    #[tokio::test]
    async fn test_load_error_is_not_cached() {
        let fx = fixture(&[]);
        let err = fx
            .pipeline
            .process_for_distance_field("missing.svg")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::LoadError { .. }));
        assert_eq!(fx.pipeline.stats().cached, 0);
    }

    #[tokio::test]
    async fn test_preload_is_idempotent() {
        let fx = fixture(&["a.svg", "b.svg"]);
        fx.pipeline
            .preload(["a.svg", "b.svg", "a.svg"], Priority::Low);
        fx.pipeline.preload(["b.svg"], Priority::Normal);
        assert_eq!(fx.pipeline.stats().queued, 2);

        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || pipeline.stats().cached == 2).await;
        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || pipeline.stats().preloading == 0).await;
        assert_eq!(fx.pipeline.stats().queued, 0);
        assert_eq!(fx.fetches(), 2);

        // Already cached: nothing to queue
        fx.pipeline.preload(["a.svg", "b.svg"], Priority::High);
        assert_eq!(fx.pipeline.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_preloads_during_drain_share_one_loop() {
        let fx = fixture(&["a.svg", "b.svg", "c.svg"]);
        fx.pipeline.preload(["a.svg"], Priority::Normal);
        assert!(fx.pipeline.draining.load(Ordering::Acquire));

        // The drain task has not run yet; later preloads must join it
        fx.pipeline.preload(["b.svg"], Priority::Low);
        fx.pipeline.preload(["c.svg"], Priority::High);
        fx.pipeline.preload(["a.svg", "c.svg"], Priority::Normal);

        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || pipeline.stats().cached == 3).await;
        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || !pipeline.draining.load(Ordering::Acquire)).await;

        assert_eq!(fx.pipeline.drain_runs.load(Ordering::Relaxed), 1);
        assert_eq!(fx.fetches(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_after_last_slice_is_drained() {
        let fx = fixture(&["a.svg"]);

        // A drain is finishing: the flag is still set, so this preload
        // does not start a loop of its own
        fx.pipeline.draining.store(true, Ordering::Release);
        fx.pipeline.preload(["a.svg"], Priority::Normal);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.pipeline.stats().queued, 1);
        assert_eq!(fx.pipeline.drain_runs.load(Ordering::Relaxed), 0);

        // The finishing drain notices the item and keeps the flag
        assert!(fx.pipeline.finish_drain());
        assert!(fx.pipeline.draining.load(Ordering::Acquire));

        Arc::clone(&fx.pipeline).drain().await;
        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || pipeline.stats().preloading == 0).await;
        assert!(fx.pipeline.cached("a.svg").is_some());
        assert!(!fx.pipeline.draining.load(Ordering::Acquire));

        // Nothing left: the flag is released for good
        assert!(!fx.pipeline.finish_drain());
        assert!(!fx.pipeline.draining.load(Ordering::Acquire));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stats_concurrent_with_cache_hits() {
        const ROUNDS: usize = 200_000;
        let fx = fixture(&["a.svg"]);
        fx.pipeline
            .process_for_distance_field("a.svg")
            .await
            .unwrap();

        let pipeline = Arc::clone(&fx.pipeline);
        let stats = tokio::task::spawn_blocking(move || {
            for _ in 0..ROUNDS {
                assert_eq!(pipeline.stats().cached, 1);
            }
        });

        let pipeline = Arc::clone(&fx.pipeline);
        let hits = tokio::spawn(async move {
            for _ in 0..ROUNDS {
                pipeline.process_for_distance_field("a.svg").await.unwrap();
            }
        });

        let joined = tokio::time::timeout(Duration::from_secs(30), async {
            stats.await.unwrap();
            hits.await.unwrap();
        })
        .await;
        assert!(joined.is_ok(), "stats and cache hits stalled each other");
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn test_high_priority_shares_job_with_drain() {
        let fx = fixture(&["a.svg"]);
        let icon = fx.pipeline.process_high_priority("a.svg").await.unwrap();
        assert_eq!(icon.width, 160);

        let pipeline = Arc::clone(&fx.pipeline);
        wait_until(move || pipeline.stats().queued == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.fetches(), 1);
    }

    #[test]
    fn test_preload_without_runtime_stays_queued() {
        let fx = fixture(&["a.svg"]);
        fx.pipeline.preload(["a.svg"], Priority::Normal);
        assert_eq!(fx.pipeline.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_submit_before_pool_exists() {
        let fx = fixture(&[]);
        let bitmap = RasterBitmap::from_rgba(1, 1, vec![255; 4]);
        let err = fx
            .pipeline
            .submit_bitmap(bitmap, ProcessMode::metallic())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::PoolUninitialized);
    }

    #[tokio::test]
    async fn test_shutdown_is_final() {
        let fx = fixture(&["square.svg"]);
        fx.pipeline
            .process_for_distance_field("square.svg")
            .await
            .unwrap();
        assert_eq!(fx.pipeline.stats().workers, 3);

        fx.pipeline.shutdown();
        assert_eq!(fx.pipeline.stats().cached, 0);
        assert_eq!(fx.pipeline.stats().workers, 0);

        let err = fx
            .pipeline
            .process_for_distance_field("square.svg")
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ShutDown);

        let bitmap = RasterBitmap::from_rgba(1, 1, vec![255; 4]);
        let err = fx
            .pipeline
            .submit_bitmap(bitmap, ProcessMode::metallic())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ShutDown);
    }
}
