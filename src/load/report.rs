use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::{LiveStats, Percentiles};

use super::plan::PlanMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Stopped,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

/// Final summary of a load run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: PlanMode,
    pub status: RunStatus,
    pub duration_secs: f64,
    pub requests_sent: u64,
    /// Zero for open-ended plans.
    pub requests_expected: u64,
    /// `false` when the drain timeout expired with requests still in flight.
    pub drained: bool,
    pub stats: LiveStats,
    pub percentiles: Percentiles,
    pub status_codes: BTreeMap<u16, u64>,
    pub flushed_records: usize,
}

impl RunReport {
    /// Pretty-printed JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary lines.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Run {} {}", self.run_id, self.status.as_str()),
            format!("mode: {}", self.mode.as_str()),
            format!("duration_s: {:.2}", self.duration_secs),
            format!(
                "requests: {} sent / {} completed{}",
                self.requests_sent,
                self.stats.total_requests,
                expected_suffix(self.requests_expected)
            ),
            format!(
                "errors: {} ({:.2}%)",
                self.stats.total_errors, self.stats.error_rate
            ),
            format!("throughput_rps: {:.2}", self.stats.throughput),
            format!("avg_latency_ms: {:.2}", self.stats.avg_latency_ms),
            format!(
                "latency_ms: min {:.2} | p50 {:.2} | p90 {:.2} | p95 {:.2} | p99 {:.2} | max {:.2}",
                self.percentiles.min,
                self.percentiles.p50,
                self.percentiles.p90,
                self.percentiles.p95,
                self.percentiles.p99,
                self.percentiles.max
            ),
        ];
        if !self.status_codes.is_empty() {
            let codes = self
                .status_codes
                .iter()
                .map(|(code, count)| format!("{}={}", code, count))
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!("status_codes: {}", codes));
        }
        if self.flushed_records > 0 {
            lines.push(format!("persisted_records: {}", self.flushed_records));
        }
        if !self.drained {
            lines.push("warning: run ended with requests still in flight".to_owned());
        }
        lines
    }
}

fn expected_suffix(expected: u64) -> String {
    if expected == 0 {
        String::new()
    } else {
        format!(" (expected {})", expected)
    }
}
