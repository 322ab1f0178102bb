//! Sharded event loop: N workers, each multiplexing many transfers on one
//! thread.
mod config;
mod transfer;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, TransferError};
use crate::metrics::MetricsCollector;

use super::transport::{ProgressCallback, ReqwestTransportFactory, TransportFactory};
use super::types::{BatchResult, EventLoopStats, Request, TransferResult};

pub use config::{
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_PER_HOST, DEFAULT_POLL_TIMEOUT_MS, EventLoopConfig,
};
pub use transfer::{RequestCallback, RequestHandle};

use transfer::{CompletionSink, TransferData};
use worker::EventLoopWorker;

/// Default grace period for [`EventLoop::stop_within`].
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct EventLoop {
    config: EventLoopConfig,
    workers: Vec<EventLoopWorker>,
    transport: Arc<dyn TransportFactory>,
    next_worker: AtomicUsize,
    next_request_id: AtomicU64,
    running: AtomicBool,
    metrics: RwLock<Option<Arc<MetricsCollector>>>,
}

impl EventLoop {
    /// Creates a loop backed by the `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be configured, for
    /// example because the proxy URL is invalid.
    pub fn new(config: EventLoopConfig) -> AppResult<Self> {
        let factory = ReqwestTransportFactory::new(config.transport()).map_err(AppError::http)?;
        Ok(Self::with_transport(config, Arc::new(factory)))
    }

    #[must_use]
    pub fn with_transport(config: EventLoopConfig, transport: Arc<dyn TransportFactory>) -> Self {
        let worker_count = config.resolved_workers();
        let workers = (0..worker_count)
            .map(|index| {
                EventLoopWorker::new(
                    index,
                    config.max_concurrent,
                    config.poll_timeout(),
                    config.rate_limiter(),
                )
            })
            .collect();
        Self {
            config,
            workers,
            transport,
            next_worker: AtomicUsize::new(0),
            next_request_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            metrics: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawns every worker thread. Calling it on a running loop is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when a worker runtime or thread cannot be created;
    /// workers started before the failure are stopped again.
    pub fn start(&self) -> AppResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for worker in &self.workers {
            if let Err(err) = worker.start(Arc::clone(&self.transport)) {
                self.running.store(false, Ordering::Release);
                self.shutdown_workers(false, None);
                return Err(AppError::http(err));
            }
        }
        info!(
            "Event loop started with {} workers (max_concurrent={}, target_rps={})",
            self.workers.len(),
            self.config.max_concurrent,
            self.config.target_rps
        );
        Ok(())
    }

    /// Stops every worker and joins its thread.
    ///
    /// With `wait_for_pending`, queued transfers still run; otherwise they
    /// resolve immediately as cancelled. Active transfers always finish.
    pub fn stop(&self, wait_for_pending: bool) {
        self.running.store(false, Ordering::Release);
        self.shutdown_workers(wait_for_pending, None);
    }

    /// Like [`EventLoop::stop`], but detaches workers still running after
    /// `grace`. Returns `true` when every worker exited in time.
    pub fn stop_within(&self, wait_for_pending: bool, grace: Duration) -> bool {
        self.running.store(false, Ordering::Release);
        self.shutdown_workers(wait_for_pending, Some(grace))
    }

    fn shutdown_workers(&self, wait_for_pending: bool, grace: Option<Duration>) -> bool {
        for worker in &self.workers {
            worker.request_stop(wait_for_pending);
        }
        let deadline = grace.and_then(|grace| Instant::now().checked_add(grace));
        let mut all_joined = true;
        for (index, worker) in self.workers.iter().enumerate() {
            let Some(handle) = worker.take_thread() else {
                continue;
            };
            match join_worker(handle, deadline) {
                JoinOutcome::Joined => {}
                JoinOutcome::Panicked => warn!("Event loop worker {} panicked", index),
                JoinOutcome::Detached => {
                    warn!("Event loop worker {} did not stop in time; detaching", index);
                    all_joined = false;
                }
            }
        }
        debug!("Event loop stopped");
        all_joined
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.workers.iter().any(EventLoopWorker::is_running)
    }

    /// Routes outcomes of subsequently submitted requests to `collector`.
    pub fn attach_metrics(&self, collector: Arc<MetricsCollector>) {
        *self.metrics.write().unwrap_or_else(PoisonError::into_inner) = Some(collector);
    }

    pub fn detach_metrics(&self) -> Option<Arc<MetricsCollector>> {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn metrics(&self) -> Option<Arc<MetricsCollector>> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queues a request; `callback` runs on a worker thread when it resolves.
    pub fn submit<F>(&self, request: Request, callback: F) -> u64
    where
        F: FnOnce(u64, TransferResult) + Send + 'static,
    {
        self.dispatch(request, CompletionSink::Callback(Box::new(callback)), None)
    }

    pub fn submit_with_progress<F>(
        &self,
        request: Request,
        callback: F,
        progress: ProgressCallback,
    ) -> u64
    where
        F: FnOnce(u64, TransferResult) + Send + 'static,
    {
        self.dispatch(
            request,
            CompletionSink::Callback(Box::new(callback)),
            Some(progress),
        )
    }

    /// Queues a request and returns a handle resolving to its outcome.
    pub fn submit_async(&self, request: Request) -> RequestHandle {
        let (sender, receiver) = oneshot::channel();
        let id = self.dispatch(request, CompletionSink::Promise(sender), None);
        RequestHandle::new(id, receiver)
    }

    fn dispatch(
        &self,
        request: Request,
        sink: CompletionSink,
        progress: Option<ProgressCallback>,
    ) -> u64 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let transfer = TransferData::new(id, request, sink, progress, self.metrics());
        let count = self.workers.len().max(1);
        let slot = self
            .next_worker
            .fetch_add(1, Ordering::Relaxed)
            .checked_rem(count)
            .unwrap_or(0);
        match self.workers.get(slot) {
            Some(worker) => worker.enqueue(transfer),
            None => transfer.complete(Err(TransferError::internal("Event loop has no workers"))),
        }
        id
    }

    /// Submits every request and blocks until all resolve.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn execute_batch<I>(&self, requests: I) -> BatchResult
    where
        I: IntoIterator<Item = Request>,
    {
        let started = Instant::now();
        let handles: Vec<RequestHandle> = requests
            .into_iter()
            .map(|request| self.submit_async(request))
            .collect();
        let outcomes = handles.into_iter().map(RequestHandle::wait).collect();
        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        BatchResult::from_outcomes(outcomes, total_time_ms)
    }

    /// Cancels a request that has not been admitted yet.
    ///
    /// Returns `false` once the request is active or already resolved.
    pub fn cancel(&self, id: u64) -> bool {
        self.workers.iter().any(|worker| worker.cancel(id))
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.workers
            .iter()
            .fold(0usize, |acc, worker| acc.saturating_add(worker.active_count()))
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.workers
            .iter()
            .fold(0usize, |acc, worker| acc.saturating_add(worker.pending_count()))
    }

    #[must_use]
    pub fn total_processed(&self) -> u64 {
        self.workers
            .iter()
            .fold(0u64, |acc, worker| acc.saturating_add(worker.processed()))
    }

    #[must_use]
    pub fn stats(&self) -> EventLoopStats {
        EventLoopStats {
            total_requests: self
                .next_request_id
                .load(Ordering::Relaxed)
                .saturating_sub(1),
            active_requests: self.active_count(),
            pending_requests: self.pending_count(),
            completed_requests: self.total_processed(),
        }
    }

    /// Refills every worker's token bucket, typically between runs.
    pub fn reset_rate_limiters(&self) {
        for worker in &self.workers {
            worker.reset_rate_limiter();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _all_joined = self.stop_within(false, DEFAULT_STOP_GRACE);
    }
}

enum JoinOutcome {
    Joined,
    Panicked,
    Detached,
}

fn join_worker(handle: JoinHandle<()>, deadline: Option<Instant>) -> JoinOutcome {
    if let Some(deadline) = deadline {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                drop(handle);
                return JoinOutcome::Detached;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
    }
    match handle.join() {
        Ok(()) => JoinOutcome::Joined,
        Err(_) => JoinOutcome::Panicked,
    }
}
