//! Outcome aggregation: counters, latency percentiles, buffered records and
//! their persistence.
mod collector;
mod histogram;
pub mod store;
mod types;


pub use collector::MetricsCollector;
pub use histogram::{
    HIGHEST_TRACKABLE_US, LOWEST_TRACKABLE_US, LatencyHistogram, SIGNIFICANT_FIGURES,
    millis_to_micros,
};
pub use store::{ResultRow, ResultStore, SqliteStore};
pub use types::{
    DEFAULT_SLOW_THRESHOLD_MS, LiveStats, MetricsCollectorConfig, Outcome, Percentiles,
    ResponseSample, ResultRecord,
};
