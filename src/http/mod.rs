//! Request execution: admission control, the sharded event loop, the
//! blocking thread pool and the transport adapter they share.
pub mod event_loop;
mod pool;
mod rate;
pub mod transport;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use event_loop::{
    DEFAULT_STOP_GRACE, EventLoop, EventLoopConfig, RequestCallback, RequestHandle,
};
pub use pool::{TaskHandle, ThreadPool};
pub use rate::{BURST_MULTIPLIER, RateLimiter, RateLimiterConfig};
pub use transport::{
    BlockingTransport, ProgressCallback, ReqwestTransport, ReqwestTransportFactory, Transport,
    TransportConfig, TransportFactory, TransferFuture,
};
pub use types::{
    BatchResult, Body, BodyMode, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_MS, EventLoopStats,
    Headers, HttpMethod, Request, Response, Timing, TransferResult,
};
