use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{AppError, AppResult, HttpError, TransferError};

use super::transport::{BlockingTransport, TransportConfig};
use super::types::{BatchResult, Request, TransferResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PoolShared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    stopping: AtomicBool,
}

impl PoolShared {
    fn next_task(&self) -> Option<Task> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            if self.stopping.load(Ordering::Acquire) {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Result of a task submitted to a [`ThreadPool`].
#[derive(Debug)]
pub struct TaskHandle<R> {
    receiver: oneshot::Receiver<Result<R, HttpError>>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task has run.
    ///
    /// # Errors
    ///
    /// Returns an error when the task panicked or was dropped unexecuted.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn wait(self) -> Result<R, HttpError> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(HttpError::TaskDropped))
    }
}

/// Fixed-size pool of blocking workers, one task per thread at a time.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
    transport: Arc<BlockingTransport>,
}

impl ThreadPool {
    /// Spawns `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns an error when a worker thread cannot be spawned.
    pub fn new(threads: usize, transport: TransportConfig) -> AppResult<Self> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopping: AtomicBool::new(false),
        });
        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(threads.max(1)),
            transport: Arc::new(BlockingTransport::new(transport)),
        };
        for index in 0..threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            let name = format!("volley-pool-{}", index);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    while let Some(task) = shared.next_task() {
                        task();
                    }
                })
                .map_err(|source| AppError::http(HttpError::SpawnThread { name, source }))?;
            pool.threads.push(handle);
        }
        debug!("Thread pool started with {} threads", pool.threads.len());
        Ok(pool)
    }

    /// Queues a task. A panicking task resolves its handle with an error and
    /// leaves the worker thread alive.
    pub fn submit<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let job: Task = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task)).map_err(|_panic| {
                error!("Thread pool task panicked");
                HttpError::TaskPanicked
            });
            drop(sender.send(outcome));
        });
        lock(&self.shared.queue).push_back(job);
        self.shared.available.notify_one();
        TaskHandle { receiver }
    }

    /// Runs each request as one blocking call and waits for all of them.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn execute_batch(&self, requests: &[Request]) -> BatchResult {
        let started = Instant::now();
        let handles: Vec<TaskHandle<TransferResult>> = requests
            .iter()
            .cloned()
            .map(|request| {
                let transport = Arc::clone(&self.transport);
                self.submit(move || transport.execute(&request))
            })
            .collect();
        let outcomes = handles
            .into_iter()
            .map(|handle| {
                handle
                    .wait()
                    .unwrap_or_else(|err| Err(TransferError::internal(err.to_string())))
            })
            .collect();
        BatchResult::from_outcomes(outcomes, started.elapsed().as_secs_f64() * 1000.0)
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn queue_size(&self) -> usize {
        lock(&self.shared.queue).len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let _queue = lock(&self.shared.queue);
            self.shared.stopping.store(true, Ordering::Release);
        }
        self.shared.available.notify_all();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Thread pool worker panicked");
            }
        }
    }
}
