use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::args::OutputFormat;
use crate::error::ValidationError;
use crate::http::{BodyMode, EventLoopConfig, Request};
use crate::load::{LoadPlan, PlanMode, RunOptions};
use crate::metrics::MetricsCollectorConfig;

/// On-disk configuration: `volley.toml` or `volley.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub request: RequestSection,
    pub run: RunSection,
    pub event_loop: EventLoopSection,
    pub metrics: Option<MetricsCollectorConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestSection {
    pub url: Option<String>,
    pub method: Option<String>,
    /// `Key: Value` strings.
    pub headers: Option<Vec<String>>,
    pub data: Option<String>,
    pub body_mode: Option<BodyMode>,
    pub timeout: Option<DurationValue>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<u32>,
    pub verify_ssl: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunSection {
    pub mode: Option<PlanMode>,
    pub duration: Option<DurationValue>,
    pub iterations: Option<u64>,
    #[serde(alias = "connections")]
    pub concurrency: Option<usize>,
    #[serde(alias = "rps", alias = "target_rps")]
    pub rate: Option<f64>,
    pub ramp_up: Option<DurationValue>,
    pub start_concurrency: Option<usize>,
    pub run_id: Option<String>,
    pub db: Option<String>,
    pub stats_interval: Option<DurationValue>,
    pub flush_interval: Option<DurationValue>,
    pub drain_timeout: Option<DurationValue>,
    pub output: Option<OutputFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventLoopSection {
    #[serde(alias = "num_workers")]
    pub workers: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub max_per_host: Option<usize>,
    pub poll_timeout_ms: Option<u64>,
    #[serde(alias = "target_rps")]
    pub worker_rps: Option<f64>,
    #[serde(alias = "burst_size")]
    pub burst: Option<f64>,
    pub user_agent: Option<String>,
    #[serde(alias = "proxy_url")]
    pub proxy: Option<String>,
    pub tcp_keepalive_secs: Option<u64>,
}

/// Duration as whole seconds or a suffixed string (`250ms`, `30s`, `5m`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            Self::Seconds(0) => Err(ValidationError::DurationZero),
            Self::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            Self::Text(text) => super::parse_duration_value(text),
        }
    }
}

/// Everything a run needs, after CLI, file and defaults are merged.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub request: Request,
    pub plan: LoadPlan,
    pub event_loop: EventLoopConfig,
    pub metrics: MetricsCollectorConfig,
    pub options: RunOptions,
    pub run_id: Option<String>,
    pub db_path: Option<PathBuf>,
    pub output: OutputFormat,
}
