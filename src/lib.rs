//! Core library for the `volley` load generator.
//!
//! The execution core is the sharded [`http::EventLoop`]: worker threads that
//! each multiplex many transfers, admit work through a token-bucket
//! [`http::RateLimiter`], and report outcomes into a shared
//! [`metrics::MetricsCollector`]. [`load::LoadRunner`] drives the loop from a
//! [`load::LoadPlan`] and persists results through a [`metrics::ResultStore`].
pub mod args;
pub mod config;
pub mod entry;
pub mod error;
pub mod http;
pub mod load;
pub mod logger;
pub mod metrics;
pub mod shutdown;

/// User-Agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));
