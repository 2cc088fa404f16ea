//! Fixed-size pool of worker threads
//!
//! Jobs are dealt round-robin. Each submission gets a fresh id and a
//! oneshot slot in the pending table; the worker that finishes the job
//! resolves the slot with the same id, so replies may arrive in any order.
//! Slots whose submitter gave up (timeout) are removed, and late replies
//! for them are dropped.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

use super::process::ProcessSettings;
use super::protocol::{ProcessMode, WorkerMessage, WorkerRequest, WorkerResponse};
use crate::error::{PipelineError, Result};
use crate::raster::RasterBitmap;
use crate::state::{PipelineConfig, ProcessedIcon};

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<WorkerResponse>>>>;

/// Background processing threads plus the table of unanswered requests
pub struct WorkerPool {
    senders: Vec<Sender<WorkerMessage>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pending: PendingTable,
    next_id: AtomicU64,
    next_worker: AtomicUsize,
    timeout: Duration,
    low_end: bool,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Spawn the workers described by a pipeline config
    pub fn spawn(config: &PipelineConfig) -> Result<Self> {
        let settings = ProcessSettings {
            low_end: config.profile.low_end,
            field: config.field,
        };
        let mut pool =
            Self::spawn_with(config.worker_count, config.worker_timeout(), move |request| {
                request.run(&settings)
            })?;
        pool.low_end = settings.low_end;
        Ok(pool)
    }

    /// Spawn `count` workers running `job` on every request
    pub fn spawn_with<F>(count: usize, timeout: Duration, job: F) -> Result<Self>
    where
        F: Fn(WorkerRequest) -> WorkerResponse + Send + Sync + 'static,
    {
        let count = count.max(1);
        let job = Arc::new(job);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let (tx, rx) = unbounded::<WorkerMessage>();
            let job = Arc::clone(&job);
            let pending = Arc::clone(&pending);

            let handle = thread::Builder::new()
                .name(format!("icon-worker-{}", index))
                .spawn(move || {
                    while let Ok(message) = rx.recv() {
                        let request = match message {
                            WorkerMessage::Job(request) => request,
                            WorkerMessage::Terminate => break,
                        };
                        let response = job(request);
                        deliver(&pending, response);
                    }
                    tracing::debug!(worker = index, "worker stopped");
                })
                .map_err(|e| PipelineError::WorkerProcessing(format!("failed to spawn worker: {}", e)))?;

            senders.push(tx);
            handles.push(handle);
        }

        tracing::info!(workers = count, "worker pool started");

        Ok(Self {
            senders,
            handles: Mutex::new(handles),
            pending,
            next_id: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
            timeout,
            low_end: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Process a bitmap on the next worker
    pub async fn submit(&self, bitmap: RasterBitmap, mode: ProcessMode) -> Result<ProcessedIcon> {
        self.dispatch(Some(bitmap), mode).await
    }

    /// Send a request and wait for the reply carrying its id
    pub async fn dispatch(
        &self,
        bitmap: Option<RasterBitmap>,
        mode: ProcessMode,
    ) -> Result<ProcessedIcon> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::ShutDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let request = WorkerRequest {
            id,
            bitmap,
            mode,
            low_end: self.low_end,
        };
        if self.senders[worker].send(WorkerMessage::Job(request)).is_err() {
            self.pending.lock().remove(&id);
            return Err(PipelineError::ShutDown);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response.outcome.map_err(PipelineError::WorkerProcessing),
            Ok(Err(_)) if self.closed.load(Ordering::Acquire) => Err(PipelineError::ShutDown),
            Ok(Err(_)) => Err(PipelineError::Cancelled),
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::warn!(id, after = ?self.timeout, "worker request timed out");
                Err(PipelineError::WorkerTimeout {
                    id,
                    after: self.timeout,
                })
            }
        }
    }

    /// Stop every worker and fail outstanding requests
    ///
    /// Waits for each worker to finish the job it is running.
    pub fn terminate(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for sender in &self.senders {
            let _ = sender.send(WorkerMessage::Terminate);
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }

        // Dropping the slots wakes every waiter
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        tracing::info!(outstanding = dropped, "worker pool terminated");
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Requests still waiting for a reply
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_terminated(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn deliver(pending: &PendingTable, response: WorkerResponse) {
    let slot = pending.lock().remove(&response.id);
    match slot {
        Some(tx) => {
            // Receiver gone means the submitter stopped waiting
            let _ = tx.send(response);
        }
        None => tracing::debug!(id = response.id, "discarding late worker reply"),
    }
}
