use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::http::Headers;

pub const DEFAULT_EXPECTED_REQUESTS: usize = 100_000;
pub const DEFAULT_MAX_SUCCESS_RESULTS: usize = 1000;
pub const DEFAULT_SUCCESS_SAMPLE_RATE: u64 = 100;
pub const DEFAULT_MAX_RESPONSE_SAMPLES: usize = 1000;
pub const DEFAULT_RESPONSE_SAMPLE_RATE: u64 = 100;
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Construction-time settings of a [`MetricsCollector`](super::MetricsCollector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsCollectorConfig {
    /// Pre-allocation hint for the record buffers.
    pub expected_requests: usize,
    /// Stored error records; zero keeps every error.
    pub max_errors: usize,
    /// Stored success traces; zero keeps every sampled trace.
    pub max_success_results: usize,
    /// Keep one success trace per this many successes.
    pub success_sample_rate: u64,
    pub store_success_traces: bool,
    pub max_response_samples: usize,
    pub response_sample_rate: u64,
    /// Capture response bodies for downstream assertions.
    pub sample_responses: bool,
    /// Successes at or above this latency get a timing trace; zero disables.
    pub slow_threshold_ms: u64,
    /// Attach a timing trace to every success.
    pub save_timing_breakdown: bool,
}

impl Default for MetricsCollectorConfig {
    fn default() -> Self {
        Self {
            expected_requests: DEFAULT_EXPECTED_REQUESTS,
            max_errors: 0,
            max_success_results: DEFAULT_MAX_SUCCESS_RESULTS,
            success_sample_rate: DEFAULT_SUCCESS_SAMPLE_RATE,
            store_success_traces: false,
            max_response_samples: DEFAULT_MAX_RESPONSE_SAMPLES,
            response_sample_rate: DEFAULT_RESPONSE_SAMPLE_RATE,
            sample_responses: false,
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
            save_timing_breakdown: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { status_code: u16, latency_ms: f64 },
    Failure { code: ErrorCode, message: String },
}

/// One buffered result awaiting persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    /// Unix time in milliseconds.
    pub timestamp_ms: i64,
    pub outcome: Outcome,
    pub trace: Option<String>,
}

impl ResultRecord {
    pub(crate) fn heap_bytes(&self) -> usize {
        let message = match &self.outcome {
            Outcome::Success { .. } => 0,
            Outcome::Failure { message, .. } => message.capacity(),
        };
        message.saturating_add(self.trace.as_ref().map_or(0, String::capacity))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSample {
    pub status_code: u16,
    pub status_text: String,
    pub body: String,
    pub headers: Headers,
    pub latency_ms: f64,
    pub timestamp_ms: i64,
}

impl ResponseSample {
    pub(crate) fn heap_bytes(&self) -> usize {
        self.status_text
            .capacity()
            .saturating_add(self.body.capacity())
            .saturating_add(self.headers.heap_bytes())
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub min: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

/// Point-in-time view for live reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_success: u64,
    /// Percentage, 0..=100.
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    /// Requests handed to the engine per second.
    pub send_rate: f64,
    /// Requests completed per second.
    pub throughput: f64,
    pub active_connections: usize,
    pub elapsed_seconds: f64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
}

impl LiveStats {
    /// Serializes with the camelCase keys used by the live stats stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
