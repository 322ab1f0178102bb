use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::{HttpError, TransferError};
use crate::http::rate::{RateLimiter, RateLimiterConfig};
use crate::http::transport::{ProgressCallback, Transport, TransportFactory, TransferFuture};
use crate::http::types::{Request, TransferResult};

use super::transfer::TransferData;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type InFlight = FuturesUnordered<LocalBoxFuture<'static, (u64, TransferResult)>>;

/// State shared between a worker thread and the owning event loop.
pub(super) struct WorkerShared {
    index: usize,
    max_concurrent: usize,
    poll_timeout: Duration,
    pending: Mutex<VecDeque<TransferData>>,
    queue_ready: Condvar,
    wake: Notify,
    active: Mutex<HashMap<u64, TransferData>>,
    limiter: RateLimiter,
    stop_requested: AtomicBool,
    processed: AtomicU64,
}

impl WorkerShared {
    fn new(
        index: usize,
        max_concurrent: usize,
        poll_timeout: Duration,
        limiter: RateLimiterConfig,
    ) -> Self {
        Self {
            index,
            max_concurrent: max_concurrent.max(1),
            poll_timeout,
            pending: Mutex::new(VecDeque::new()),
            queue_ready: Condvar::new(),
            wake: Notify::new(),
            active: Mutex::new(HashMap::new()),
            limiter: RateLimiter::new(limiter),
            stop_requested: AtomicBool::new(false),
            processed: AtomicU64::new(0),
        }
    }

    fn notify(&self) {
        self.queue_ready.notify_one();
        self.wake.notify_one();
    }

    /// Moves admissible transfers out of the pending queue.
    ///
    /// Returns the admitted transfers and whether the limiter denied one.
    fn admit(&self) -> (Vec<TransferData>, bool) {
        let mut pending = lock(&self.pending);
        let mut admitted = Vec::new();
        let mut throttled = false;
        while !pending.is_empty() {
            let active = lock(&self.active).len();
            if active.saturating_add(admitted.len()) >= self.max_concurrent {
                break;
            }
            if !self.limiter.try_acquire() {
                throttled = true;
                break;
            }
            if let Some(transfer) = pending.pop_front() {
                admitted.push(transfer);
            }
        }
        (admitted, throttled)
    }

    fn finish(&self, id: u64, result: TransferResult) {
        let transfer = lock(&self.active).remove(&id);
        match transfer {
            Some(transfer) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                transfer.complete(result);
            }
            None => warn!(
                "Worker {} completed unknown transfer {}",
                self.index, id
            ),
        }
    }

    fn should_exit(&self, in_flight_empty: bool) -> bool {
        self.stop_requested.load(Ordering::Acquire)
            && in_flight_empty
            && lock(&self.pending).is_empty()
    }

    /// Parks the thread until work arrives or the poll timeout elapses.
    fn wait_for_work(&self) {
        let pending = lock(&self.pending);
        if !pending.is_empty() || self.stop_requested.load(Ordering::Acquire) {
            return;
        }
        drop(
            self.queue_ready
                .wait_timeout(pending, self.poll_timeout)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }
}

/// One shard of the event loop: a thread, a runtime, a transport and a
/// rate limiter.
pub(super) struct EventLoopWorker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoopWorker {
    pub(super) fn new(
        index: usize,
        max_concurrent: usize,
        poll_timeout: Duration,
        limiter: RateLimiterConfig,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared::new(
                index,
                max_concurrent,
                poll_timeout,
                limiter,
            )),
            thread: Mutex::new(None),
        }
    }

    pub(super) fn is_running(&self) -> bool {
        lock(&self.thread)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(super) fn start(&self, transport: Arc<dyn TransportFactory>) -> Result<(), HttpError> {
        let mut thread = lock(&self.thread);
        if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(previous) = thread.take() {
            drop(previous.join());
        }

        let index = self.shared.index;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| HttpError::BuildRuntime { index, source })?;

        self.shared.stop_requested.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let name = format!("volley-worker-{}", index);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&shared, &runtime, transport.as_ref()))
            .map_err(|source| HttpError::SpawnThread { name, source })?;
        *thread = Some(handle);
        debug!("Started event loop worker {}", index);
        Ok(())
    }

    /// Flags the worker to exit once its queue and in-flight set drain.
    /// Without `wait_for_pending`, queued transfers are failed immediately.
    pub(super) fn request_stop(&self, wait_for_pending: bool) {
        let cancelled: Vec<TransferData> = {
            let mut pending = lock(&self.shared.pending);
            self.shared.stop_requested.store(true, Ordering::Release);
            if wait_for_pending {
                Vec::new()
            } else {
                pending.drain(..).collect()
            }
        };
        self.shared.notify();
        if !cancelled.is_empty() {
            debug!(
                "Worker {} cancelling {} queued transfers",
                self.shared.index,
                cancelled.len()
            );
        }
        for transfer in cancelled {
            transfer.complete(Err(TransferError::cancelled()));
        }
    }

    pub(super) fn take_thread(&self) -> Option<JoinHandle<()>> {
        lock(&self.thread).take()
    }

    pub(super) fn enqueue(&self, transfer: TransferData) {
        lock(&self.shared.pending).push_back(transfer);
        self.shared.notify();
    }

    pub(super) fn cancel(&self, id: u64) -> bool {
        let removed = {
            let mut pending = lock(&self.shared.pending);
            pending
                .iter()
                .position(|transfer| transfer.id == id)
                .and_then(|position| pending.remove(position))
        };
        match removed {
            Some(transfer) => {
                transfer.complete(Err(TransferError::cancelled()));
                true
            }
            None => false,
        }
    }

    pub(super) fn active_count(&self) -> usize {
        lock(&self.shared.active).len()
    }

    pub(super) fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub(super) fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    pub(super) fn reset_rate_limiter(&self) {
        self.shared.limiter.reset();
    }
}

impl Drop for EventLoopWorker {
    fn drop(&mut self) {
        self.request_stop(false);
        if let Some(handle) = self.take_thread()
            && handle.join().is_err()
        {
            error!("Event loop worker {} panicked", self.shared.index);
        }
    }
}

fn run_worker(shared: &WorkerShared, runtime: &Runtime, factory: &dyn TransportFactory) {
    runtime.block_on(async {
        let mut transport: Box<dyn Transport> = match factory.create(shared.index) {
            Ok(transport) => transport,
            Err(err) => {
                error!(
                    "Worker {} could not create a transport: {}",
                    shared.index, err
                );
                Box::new(FailedTransport { error: err })
            }
        };
        drive(shared, transport.as_mut()).await;
    });
    debug!("Event loop worker {} exited", shared.index);
}

async fn drive(shared: &WorkerShared, transport: &mut dyn Transport) {
    let mut in_flight: InFlight = FuturesUnordered::new();

    loop {
        let (admitted, throttled) = shared.admit();
        for transfer in admitted {
            start_transfer(shared, transport, &mut in_flight, transfer);
        }

        while let Some(Some((id, result))) = in_flight.next().now_or_never() {
            shared.finish(id, result);
        }

        if shared.should_exit(in_flight.is_empty()) {
            break;
        }

        if in_flight.is_empty() {
            if throttled {
                let wait = shared
                    .limiter
                    .time_until_available()
                    .min(shared.poll_timeout);
                tokio::time::sleep(wait).await;
            } else {
                shared.wait_for_work();
            }
            continue;
        }

        let idle = if throttled {
            shared
                .limiter
                .time_until_available()
                .min(shared.poll_timeout)
        } else {
            shared.poll_timeout
        };
        tokio::select! {
            completed = in_flight.next() => {
                if let Some((id, result)) = completed {
                    shared.finish(id, result);
                }
            }
            () = shared.wake.notified(), if !throttled => {}
            () = tokio::time::sleep(idle) => {}
        }
    }
}

fn start_transfer(
    shared: &WorkerShared,
    transport: &mut dyn Transport,
    in_flight: &mut InFlight,
    transfer: TransferData,
) {
    let id = transfer.id;
    match transport.start(id, &transfer.request, transfer.progress.clone()) {
        Ok(future) => {
            lock(&shared.active).insert(id, transfer);
            in_flight.push(future.map(move |result| (id, result)).boxed_local());
        }
        Err(err) => {
            warn!("Worker {} failed to start transfer {}: {}", shared.index, id, err);
            shared.processed.fetch_add(1, Ordering::Relaxed);
            transfer.complete(Err(TransferError::internal(err.message)));
        }
    }
}

struct FailedTransport {
    error: TransferError,
}

impl Transport for FailedTransport {
    fn start(
        &mut self,
        _id: u64,
        _request: &Request,
        _progress: Option<ProgressCallback>,
    ) -> Result<TransferFuture, TransferError> {
        Err(self.error.clone())
    }
}
