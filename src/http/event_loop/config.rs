use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::rate::RateLimiterConfig;
use crate::http::transport::TransportConfig;

pub const DEFAULT_MAX_CONCURRENT: usize = 1000;
pub const DEFAULT_MAX_PER_HOST: usize = 100;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 60;
const FALLBACK_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Worker threads; zero picks the available parallelism.
    pub num_workers: usize,
    /// In-flight transfers allowed per worker.
    pub max_concurrent: usize,
    /// Idle connections kept per host.
    pub max_per_host: usize,
    pub poll_timeout_ms: u64,
    /// Admissions per second per worker; zero disables limiting.
    pub target_rps: f64,
    pub burst_size: f64,
    pub user_agent: String,
    pub proxy_url: Option<String>,
    pub tcp_keepalive_secs: u64,
    pub verbose: bool,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_per_host: DEFAULT_MAX_PER_HOST,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            target_rps: 0.0,
            burst_size: 0.0,
            user_agent: crate::DEFAULT_USER_AGENT.to_owned(),
            proxy_url: None,
            tcp_keepalive_secs: DEFAULT_TCP_KEEPALIVE_SECS,
            verbose: false,
        }
    }
}

impl EventLoopConfig {
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism().map_or(FALLBACK_WORKERS, NonZeroUsize::get)
    }

    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    #[must_use]
    pub const fn rate_limiter(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.target_rps, self.burst_size)
    }

    #[must_use]
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            user_agent: self.user_agent.clone(),
            proxy_url: self.proxy_url.clone(),
            max_idle_per_host: self.max_per_host,
            tcp_keepalive: (self.tcp_keepalive_secs > 0)
                .then(|| Duration::from_secs(self.tcp_keepalive_secs)),
            verbose: self.verbose,
        }
    }
}
