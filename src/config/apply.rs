use std::path::PathBuf;
use std::time::Duration;

use crate::args::{OutputFormat, VolleyArgs, parse_header};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::http::{Body, BodyMode, EventLoopConfig, HttpMethod, Request};
use crate::load::{
    DEFAULT_CONSTANT_CONCURRENCY, DEFAULT_DRAIN_TIMEOUT, DEFAULT_DURATION, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_ITERATION_CONCURRENCY, DEFAULT_ITERATIONS, DEFAULT_RAMP_DURATION,
    DEFAULT_START_CONCURRENCY, DEFAULT_STATS_INTERVAL, LoadPlan, PlanMode, RunOptions,
};
use crate::metrics::MetricsCollectorConfig;

use super::types::{ConfigFile, DurationValue, RequestSection, RunSection, RunSettings};

/// Merges CLI arguments over the config file over built-in defaults.
///
/// # Errors
///
/// Returns an error when a merged value is missing or out of range.
pub fn resolve_settings(args: &VolleyArgs, file: Option<&ConfigFile>) -> AppResult<RunSettings> {
    let fallback = ConfigFile::default();
    let file = file.unwrap_or(&fallback);

    let request = resolve_request(args, &file.request)?;
    let plan = resolve_plan(args, &file.run)?;
    let event_loop = resolve_event_loop(args, file)?;

    let mut metrics = file.metrics.clone().unwrap_or_default();
    if file.metrics.is_none() {
        metrics.expected_requests = expected_capacity(&plan, &metrics);
    }

    let options = RunOptions {
        stats_interval: pick_duration(
            args.stats_interval,
            file.run.stats_interval.as_ref(),
            "run.stats_interval",
        )?
        .unwrap_or(DEFAULT_STATS_INTERVAL),
        flush_interval: pick_duration(None, file.run.flush_interval.as_ref(), "run.flush_interval")?
            .unwrap_or(DEFAULT_FLUSH_INTERVAL),
        drain_timeout: pick_duration(None, file.run.drain_timeout.as_ref(), "run.drain_timeout")?
            .unwrap_or(DEFAULT_DRAIN_TIMEOUT),
    };

    Ok(RunSettings {
        request,
        plan,
        event_loop,
        metrics,
        options,
        run_id: args.run_id.clone().or_else(|| file.run.run_id.clone()),
        db_path: args
            .db
            .as_ref()
            .or(file.run.db.as_ref())
            .map(PathBuf::from),
        output: args.output.or(file.run.output).unwrap_or(OutputFormat::Text),
    })
}

fn resolve_request(args: &VolleyArgs, section: &RequestSection) -> AppResult<Request> {
    let url = args
        .url
        .clone()
        .or_else(|| section.url.clone())
        .ok_or(ValidationError::MissingUrl)?;
    url::Url::parse(&url).map_err(|err| ValidationError::InvalidUrl {
        url: url.clone(),
        source: err,
    })?;

    let method = match (args.method, section.method.as_deref()) {
        (Some(method), _) => method,
        (None, Some(value)) => value.parse::<HttpMethod>().map_err(|_err| {
            ConfigError::InvalidMethod {
                value: value.to_owned(),
            }
        })?,
        (None, None) => HttpMethod::Get,
    };

    let mut request = Request::new(method, url);
    for raw in section.headers.iter().flatten() {
        let (name, value) =
            parse_header(raw).map_err(|err| ConfigError::InvalidHeader { source: err })?;
        request.headers.insert(name, value);
    }
    for (name, value) in &args.headers {
        request.headers.insert(name, value.clone());
    }

    if let Some(data) = args.data.as_ref().or(section.data.as_ref()) {
        let mode = args
            .body_mode
            .or(section.body_mode)
            .unwrap_or(BodyMode::Raw);
        request.body = Body::new(mode, data.clone());
    }

    let timeout = pick_duration(args.timeout, section.timeout.as_ref(), "request.timeout")?;
    if let Some(timeout) = timeout {
        request.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }
    request.follow_redirects = !args.no_follow_redirects && section.follow_redirects.unwrap_or(true);
    if let Some(max_redirects) = args.max_redirects.or(section.max_redirects) {
        request.max_redirects = max_redirects;
    }
    request.verify_ssl = !args.insecure && section.verify_ssl.unwrap_or(true);
    Ok(request)
}

fn resolve_plan(args: &VolleyArgs, section: &RunSection) -> AppResult<LoadPlan> {
    let iterations = match args.iterations {
        Some(value) => Some(value.get()),
        None => match section.iterations {
            Some(0) => {
                return Err(AppError::config(ConfigError::FieldMustBePositive {
                    field: "run.iterations",
                }));
            }
            other => other,
        },
    };
    let concurrency = pick_positive(
        args.concurrency.map(usize::from),
        section.concurrency,
        "run.concurrency",
    )?;
    let rate = pick_rate(args.rate, section.rate, "run.rate")?.unwrap_or(0.0);
    let duration =
        pick_duration(args.duration, section.duration.as_ref(), "run.duration")?.unwrap_or(DEFAULT_DURATION);

    let mode = args.mode.or(section.mode).unwrap_or(if iterations.is_some() {
        PlanMode::Iterations
    } else {
        PlanMode::Constant
    });

    let plan = match mode {
        PlanMode::Constant => LoadPlan::Constant {
            duration,
            target_rps: rate,
            concurrency: concurrency.unwrap_or(DEFAULT_CONSTANT_CONCURRENCY),
        },
        PlanMode::Iterations => LoadPlan::Iterations {
            iterations: iterations.unwrap_or(DEFAULT_ITERATIONS),
            concurrency: concurrency.unwrap_or(DEFAULT_ITERATION_CONCURRENCY),
            target_rps: rate,
        },
        PlanMode::RampUp => LoadPlan::RampUp {
            duration,
            ramp_duration: pick_duration(args.ramp_up, section.ramp_up.as_ref(), "run.ramp_up")?
                .unwrap_or(DEFAULT_RAMP_DURATION),
            start_concurrency: pick_positive(
                args.start_concurrency.map(usize::from),
                section.start_concurrency,
                "run.start_concurrency",
            )?
            .unwrap_or(DEFAULT_START_CONCURRENCY),
            target_concurrency: concurrency.unwrap_or(DEFAULT_CONSTANT_CONCURRENCY),
        },
    };
    plan.validate()?;
    Ok(plan)
}

fn resolve_event_loop(args: &VolleyArgs, file: &ConfigFile) -> AppResult<EventLoopConfig> {
    let section = &file.event_loop;
    let defaults = EventLoopConfig::default();
    Ok(EventLoopConfig {
        num_workers: pick_positive(
            args.workers.map(usize::from),
            section.workers,
            "event_loop.workers",
        )?
        .unwrap_or(defaults.num_workers),
        max_concurrent: pick_positive(
            args.max_concurrent.map(usize::from),
            section.max_concurrent,
            "event_loop.max_concurrent",
        )?
        .unwrap_or(defaults.max_concurrent),
        max_per_host: pick_positive(
            args.max_per_host.map(usize::from),
            section.max_per_host,
            "event_loop.max_per_host",
        )?
        .unwrap_or(defaults.max_per_host),
        poll_timeout_ms: match (args.poll_timeout_ms, section.poll_timeout_ms) {
            (Some(value), _) => value.get(),
            (None, Some(0)) => {
                return Err(AppError::config(ConfigError::FieldMustBePositive {
                    field: "event_loop.poll_timeout_ms",
                }));
            }
            (None, Some(value)) => value,
            (None, None) => defaults.poll_timeout_ms,
        },
        target_rps: pick_rate(args.worker_rps, section.worker_rps, "event_loop.worker_rps")?
            .unwrap_or(defaults.target_rps),
        burst_size: pick_rate(args.burst, section.burst, "event_loop.burst")?
            .unwrap_or(defaults.burst_size),
        user_agent: args
            .user_agent
            .clone()
            .or_else(|| section.user_agent.clone())
            .unwrap_or(defaults.user_agent),
        proxy_url: args.proxy.clone().or_else(|| section.proxy.clone()),
        tcp_keepalive_secs: section
            .tcp_keepalive_secs
            .unwrap_or(defaults.tcp_keepalive_secs),
        verbose: args.verbose,
    })
}

fn expected_capacity(plan: &LoadPlan, metrics: &MetricsCollectorConfig) -> usize {
    match usize::try_from(plan.expected_requests()) {
        Ok(0) | Err(_) => metrics.expected_requests,
        Ok(expected) => expected.min(metrics.expected_requests),
    }
}

fn pick_duration(
    cli: Option<Duration>,
    file: Option<&DurationValue>,
    field: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match (cli, file) {
        (Some(value), _) => Ok(Some(value)),
        (None, Some(value)) => value
            .to_duration()
            .map(Some)
            .map_err(|err| ConfigError::InvalidDuration { field, source: err }),
        (None, None) => Ok(None),
    }
}

fn pick_positive(
    cli: Option<usize>,
    file: Option<usize>,
    field: &'static str,
) -> Result<Option<usize>, ConfigError> {
    match cli.or(file) {
        Some(0) => Err(ConfigError::FieldMustBePositive { field }),
        other => Ok(other),
    }
}

fn pick_rate(
    cli: Option<f64>,
    file: Option<f64>,
    field: &'static str,
) -> Result<Option<f64>, ConfigError> {
    match cli.or(file) {
        Some(rate) if !rate.is_finite() || rate < 0.0 => {
            Err(ConfigError::FieldMustBeNonNegative { field })
        }
        other => Ok(other),
    }
}
