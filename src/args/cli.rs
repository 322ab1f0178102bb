use clap::Parser;
use std::time::Duration;

use crate::http::{BodyMode, HttpMethod};
use crate::load::PlanMode;

use super::parsers::{
    parse_duration_arg, parse_header, parse_positive_u64, parse_positive_usize, parse_rate,
};
use super::types::{OutputFormat, PositiveU64, PositiveUsize};

#[derive(Debug, Parser, Clone, Default)]
#[clap(
    version,
    about = "HTTP load generator: sharded event-loop workers, token-bucket pacing, live stats and SQLite result storage."
)]
pub struct VolleyArgs {
    /// Target URL
    #[arg(long, short, env = "VOLLEY_URL")]
    pub url: Option<String>,

    /// HTTP method to use
    #[arg(long, short = 'X', ignore_case = true)]
    pub method: Option<HttpMethod>,

    /// HTTP headers in 'Key: Value' format (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long, short)]
    pub data: Option<String>,

    /// How the body is encoded (defaults to raw when --data is set)
    #[arg(long = "body-mode")]
    pub body_mode: Option<BodyMode>,

    /// Per-request timeout (supports ms/s/m/h)
    #[arg(long, value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,

    /// Do not follow redirects
    #[arg(long = "no-follow-redirects")]
    pub no_follow_redirects: bool,

    /// Redirect hop limit
    #[arg(long = "max-redirects")]
    pub max_redirects: Option<u32>,

    /// Skip TLS certificate verification
    #[arg(long, short = 'k')]
    pub insecure: bool,

    /// Load plan (defaults to iterations when -n is set, else constant)
    #[arg(long)]
    pub mode: Option<PlanMode>,

    /// Test duration (supports ms/s/m/h)
    #[arg(long, short = 't', value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Total requests for the iterations plan
    #[arg(long, short = 'n', value_parser = parse_positive_u64)]
    pub iterations: Option<PositiveU64>,

    /// Concurrent requests (batch size or ramp target)
    #[arg(long, short = 'c', alias = "connections", value_parser = parse_positive_usize)]
    pub concurrency: Option<PositiveUsize>,

    /// Target requests per second (0 disables pacing)
    #[arg(long, short = 'r', alias = "rps", value_parser = parse_rate)]
    pub rate: Option<f64>,

    /// Ramp-up window for the ramp-up plan (supports ms/s/m/h)
    #[arg(long = "ramp-up", value_parser = parse_duration_arg)]
    pub ramp_up: Option<Duration>,

    /// Concurrency at the start of the ramp
    #[arg(long = "start-concurrency", value_parser = parse_positive_usize)]
    pub start_concurrency: Option<PositiveUsize>,

    /// Event-loop worker threads (defaults to available parallelism)
    #[arg(long, value_parser = parse_positive_usize)]
    pub workers: Option<PositiveUsize>,

    /// In-flight transfers per worker
    #[arg(long = "max-concurrent", value_parser = parse_positive_usize)]
    pub max_concurrent: Option<PositiveUsize>,

    /// Idle connections kept per host
    #[arg(long = "max-per-host", value_parser = parse_positive_usize)]
    pub max_per_host: Option<PositiveUsize>,

    /// Worker poll interval in milliseconds
    #[arg(long = "poll-timeout-ms", value_parser = parse_positive_u64)]
    pub poll_timeout_ms: Option<PositiveU64>,

    /// Per-worker admission rate (0 disables worker limiting)
    #[arg(long = "worker-rps", value_parser = parse_rate)]
    pub worker_rps: Option<f64>,

    /// Token bucket capacity (defaults to twice the rate)
    #[arg(long, value_parser = parse_rate)]
    pub burst: Option<f64>,

    /// Proxy URL for all requests
    #[arg(long)]
    pub proxy: Option<String>,

    /// User-Agent header value
    #[arg(long = "user-agent")]
    pub user_agent: Option<String>,

    /// Path to a volley.toml or volley.json config file
    #[arg(long)]
    pub config: Option<String>,

    /// SQLite database for per-request results
    #[arg(long, env = "VOLLEY_DB")]
    pub db: Option<String>,

    /// Run identifier (defaults to a timestamp)
    #[arg(long = "run-id")]
    pub run_id: Option<String>,

    /// Interval between live stats lines (supports ms/s/m/h)
    #[arg(long = "stats-interval", value_parser = parse_duration_arg)]
    pub stats_interval: Option<Duration>,

    /// Final report format
    #[arg(long, short = 'o')]
    pub output: Option<OutputFormat>,

    /// Verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color")]
    pub no_color: bool,
}
