use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::error;

use crate::error::TransferError;
use crate::http::transport::ProgressCallback;
use crate::http::types::{Request, TransferResult};
use crate::metrics::MetricsCollector;

/// Completion callback, invoked once with the request id and its outcome.
pub type RequestCallback = Box<dyn FnOnce(u64, TransferResult) + Send + 'static>;

/// Where a transfer's outcome goes. Consumed on resolution.
pub(crate) enum CompletionSink {
    Callback(RequestCallback),
    Promise(oneshot::Sender<TransferResult>),
}

impl CompletionSink {
    fn resolve(self, id: u64, result: TransferResult) {
        match self {
            CompletionSink::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(move || callback(id, result))).is_err() {
                    error!("Completion callback for request {} panicked", id);
                }
            }
            CompletionSink::Promise(sender) => {
                drop(sender.send(result));
            }
        }
    }
}

/// State of one submitted request, owned by exactly one worker.
pub(crate) struct TransferData {
    pub id: u64,
    pub request: Request,
    pub progress: Option<ProgressCallback>,
    sink: CompletionSink,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TransferData {
    pub(crate) fn new(
        id: u64,
        request: Request,
        sink: CompletionSink,
        progress: Option<ProgressCallback>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            id,
            request,
            progress,
            sink,
            metrics,
        }
    }

    /// Reports the outcome to the attached collector, then to the caller.
    pub(crate) fn complete(self, result: TransferResult) {
        let TransferData {
            id, sink, metrics, ..
        } = self;
        if let Some(collector) = metrics {
            collector.record_result(&result);
        }
        sink.resolve(id, result);
    }
}

/// Future side of [`EventLoop::submit_async`](super::EventLoop::submit_async).
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    receiver: oneshot::Receiver<TransferResult>,
}

impl RequestHandle {
    pub(crate) const fn new(id: u64, receiver: oneshot::Receiver<TransferResult>) -> Self {
        Self { id, receiver }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Blocks the calling thread until the transfer resolves.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context;
    /// await the handle there instead.
    #[must_use]
    pub fn wait(self) -> TransferResult {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_err| Err(dropped()))
    }

    /// Returns the outcome if it is already available.
    pub fn try_wait(&mut self) -> Option<TransferResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl Future for RequestHandle {
    type Output = TransferResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_err| Err(dropped())))
    }
}

fn dropped() -> TransferError {
    TransferError::internal("Transfer dropped before completion")
}
