//! Adapter between the event loop and the external HTTP client.
mod blocking;
mod client;
mod convert;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HttpError, TransferError};

use super::types::{Request, TransferResult};

pub use blocking::BlockingTransport;
pub use client::{ReqwestTransport, ReqwestTransportFactory};

/// Called with `(request_id, downloaded_bytes, expected_total_bytes)` as
/// body chunks arrive. The expected total is zero when unknown.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, u64) + Send + Sync + 'static>;

/// In-flight transfer driven by the worker's I/O context.
pub type TransferFuture = Pin<Box<dyn Future<Output = TransferResult> + 'static>>;

/// One multiplexed I/O context. Owned by a single worker thread.
pub trait Transport {
    /// Prepares a transfer and returns the future that performs it.
    ///
    /// # Errors
    ///
    /// Returns an error when the transfer cannot be set up at all. Request
    /// level failures (bad URL, timeouts, refused connections) are reported
    /// through the returned future instead.
    fn start(
        &mut self,
        id: u64,
        request: &Request,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferFuture, TransferError>;
}

/// Builds one transport per worker, on the worker's own thread.
pub trait TransportFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the transport cannot be created.
    fn create(&self, worker_index: usize) -> Result<Box<dyn Transport>, TransferError>;
}

/// Client settings shared by every transfer of a worker.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    pub proxy_url: Option<String>,
    pub max_idle_per_host: usize,
    pub tcp_keepalive: Option<Duration>,
    pub verbose: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::DEFAULT_USER_AGENT.to_owned(),
            proxy_url: None,
            max_idle_per_host: 100,
            tcp_keepalive: Some(Duration::from_secs(60)),
            verbose: false,
        }
    }
}

/// Per-request client options that need a dedicated client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ClientProfile {
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_ssl: bool,
}

impl ClientProfile {
    pub(crate) const fn of(request: &Request) -> Self {
        Self {
            follow_redirects: request.follow_redirects,
            max_redirects: request.max_redirects,
            verify_ssl: request.verify_ssl,
        }
    }

    fn redirect_policy(self) -> reqwest::redirect::Policy {
        if self.follow_redirects && self.max_redirects > 0 {
            reqwest::redirect::Policy::limited(usize::try_from(self.max_redirects).unwrap_or(10))
        } else {
            reqwest::redirect::Policy::none()
        }
    }
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self::of(&Request::default())
    }
}

fn build_proxy(config: &TransportConfig) -> Result<Option<reqwest::Proxy>, HttpError> {
    config
        .proxy_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .map(|url| {
            reqwest::Proxy::all(url).map_err(|source| HttpError::InvalidProxyUrl {
                url: url.to_owned(),
                source,
            })
        })
        .transpose()
}
