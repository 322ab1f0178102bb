use std::time::Duration;

use clap::Parser;
use tempfile::tempdir;

use super::{ConfigFile, load_config_file, parse_duration_value, parse_rate_value, resolve_settings};
use crate::args::{OutputFormat, VolleyArgs};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::http::{BodyMode, HttpMethod};
use crate::load::{DEFAULT_STATS_INTERVAL, LoadPlan};

fn fail(message: impl Into<String>) -> AppError {
    let message: String = message.into();
    AppError::validation(message)
}

fn args(argv: &[&str]) -> AppResult<VolleyArgs> {
    let full = std::iter::once("volley").chain(argv.iter().copied());
    Ok(VolleyArgs::try_parse_from(full)?)
}

fn write_config(name: &str, content: &str) -> AppResult<(tempfile::TempDir, ConfigFile)> {
    let dir = tempdir()?;
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    let config = load_config_file(&path)?;
    Ok((dir, config))
}

#[test]
fn durations_accept_units_and_bare_seconds() -> AppResult<()> {
    let cases = [
        ("250ms", Duration::from_millis(250)),
        ("30", Duration::from_secs(30)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3600)),
    ];
    for (raw, expected) in cases {
        let parsed = parse_duration_value(raw)?;
        if parsed != expected {
            return Err(fail(format!("{} parsed as {:?}", raw, parsed)));
        }
    }
    for bad in ["", "ms", "10d", "0s"] {
        if parse_duration_value(bad).is_ok() {
            return Err(fail(format!("'{}' should be rejected", bad)));
        }
    }
    Ok(())
}

#[test]
fn rates_must_be_finite_and_non_negative() -> AppResult<()> {
    if (parse_rate_value("12.5")? - 12.5).abs() > f64::EPSILON {
        return Err(fail("Rate parsed incorrectly"));
    }
    for bad in ["-1", "abc", "inf", "NaN"] {
        if parse_rate_value(bad).is_ok() {
            return Err(fail(format!("Rate '{}' should be rejected", bad)));
        }
    }
    Ok(())
}

#[test]
fn toml_config_fills_every_section() -> AppResult<()> {
    let (_dir, config) = write_config(
        "volley.toml",
        r#"
[request]
url = "http://localhost:3000/items"
method = "post"
headers = ["X-Trace: abc"]
data = '{"a":1}'
body_mode = "json"
timeout = "2s"

[run]
mode = "ramp-up"
duration = 30
connections = 40
ramp_up = "5s"
start_concurrency = 2
output = "json"

[event_loop]
workers = 3
max_concurrent = 64
worker_rps = 50.0

[metrics]
store_success_traces = true
"#,
    )?;
    let settings = resolve_settings(&VolleyArgs::default(), Some(&config))?;

    if settings.request.method != HttpMethod::Post
        || settings.request.headers.get("x-trace") != Some("abc")
        || settings.request.body.mode != BodyMode::Json
        || settings.request.timeout_ms != 2000
    {
        return Err(fail(format!("Unexpected request {:?}", settings.request)));
    }
    let expected = LoadPlan::RampUp {
        duration: Duration::from_secs(30),
        ramp_duration: Duration::from_secs(5),
        start_concurrency: 2,
        target_concurrency: 40,
    };
    if settings.plan != expected {
        return Err(fail(format!("Unexpected plan {:?}", settings.plan)));
    }
    if settings.event_loop.num_workers != 3 || settings.event_loop.max_concurrent != 64 {
        return Err(fail("Event loop section ignored"));
    }
    if !settings.metrics.store_success_traces || settings.output != OutputFormat::Json {
        return Err(fail("Metrics or output section ignored"));
    }
    Ok(())
}

#[test]
fn json_config_is_supported() -> AppResult<()> {
    let (_dir, config) = write_config(
        "volley.json",
        r#"{"request": {"url": "http://localhost:8080"}, "run": {"iterations": 50, "rps": 5}}"#,
    )?;
    let settings = resolve_settings(&VolleyArgs::default(), Some(&config))?;
    match settings.plan {
        LoadPlan::Iterations {
            iterations: 50,
            target_rps,
            ..
        } if (target_rps - 5.0).abs() < f64::EPSILON => Ok(()),
        other => Err(fail(format!("Unexpected plan {:?}", other))),
    }
}

#[test]
fn unknown_extension_is_rejected() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("volley.yaml");
    std::fs::write(&path, "url: x")?;
    match load_config_file(&path) {
        Err(AppError::Config(ConfigError::UnsupportedExtension { ext })) if ext == "yaml" => Ok(()),
        other => Err(fail(format!("Unexpected result {:?}", other.map(|_config| ())))),
    }
}

#[test]
fn cli_overrides_the_config_file() -> AppResult<()> {
    let (_dir, config) = write_config(
        "volley.toml",
        r#"
[request]
url = "http://file.test/"
headers = ["X-Env: file"]

[run]
iterations = 10
concurrency = 2
"#,
    )?;
    let cli = args(&[
        "-u",
        "http://cli.test/",
        "-H",
        "X-Env: cli",
        "-n",
        "25",
        "-c",
        "5",
        "-X",
        "PUT",
        "-d",
        "payload",
    ])?;
    let settings = resolve_settings(&cli, Some(&config))?;

    if settings.request.url != "http://cli.test/"
        || settings.request.headers.get("X-Env") != Some("cli")
        || settings.request.method != HttpMethod::Put
    {
        return Err(fail(format!("CLI values lost: {:?}", settings.request)));
    }
    if settings.request.body.mode != BodyMode::Raw || settings.request.body.content != "payload" {
        return Err(fail("Data should default to a raw body"));
    }
    match settings.plan {
        LoadPlan::Iterations {
            iterations: 25,
            concurrency: 5,
            ..
        } => Ok(()),
        other => Err(fail(format!("Unexpected plan {:?}", other))),
    }
}

#[test]
fn defaults_apply_without_a_config_file() -> AppResult<()> {
    let settings = resolve_settings(&args(&["-u", "http://localhost/"])?, None)?;
    if settings.plan.mode() != crate::load::PlanMode::Constant
        || settings.options.stats_interval != DEFAULT_STATS_INTERVAL
        || settings.db_path.is_some()
        || !settings.request.follow_redirects
        || !settings.request.verify_ssl
    {
        return Err(fail(format!("Unexpected defaults {:?}", settings)));
    }
    Ok(())
}

#[test]
fn missing_or_invalid_url_is_reported() -> AppResult<()> {
    match resolve_settings(&VolleyArgs::default(), None) {
        Err(AppError::Validation(ValidationError::MissingUrl)) => {}
        other => return Err(fail(format!("Expected missing url, got {:?}", other.is_ok()))),
    }
    match resolve_settings(&args(&["-u", "not a url"])?, None) {
        Err(AppError::Validation(ValidationError::InvalidUrl { .. })) => Ok(()),
        other => Err(fail(format!("Expected invalid url, got {:?}", other.is_ok()))),
    }
}

#[test]
fn invalid_file_values_name_their_field() -> AppResult<()> {
    let (_dir, config) = write_config(
        "volley.toml",
        r#"
[request]
url = "http://localhost/"

[event_loop]
max_concurrent = 0
"#,
    )?;
    match resolve_settings(&VolleyArgs::default(), Some(&config)) {
        Err(AppError::Config(ConfigError::FieldMustBePositive { field })) => {
            if field == "event_loop.max_concurrent" {
                Ok(())
            } else {
                Err(fail(format!("Wrong field {}", field)))
            }
        }
        other => Err(fail(format!("Expected rejection, got {:?}", other.is_ok()))),
    }
}

#[test]
fn unknown_method_in_file_is_rejected() -> AppResult<()> {
    let (_dir, config) = write_config(
        "volley.toml",
        r#"
[request]
url = "http://localhost/"
method = "BREW"
"#,
    )?;
    match resolve_settings(&VolleyArgs::default(), Some(&config)) {
        Err(AppError::Config(ConfigError::InvalidMethod { value })) if value == "BREW" => Ok(()),
        other => Err(fail(format!("Expected rejection, got {:?}", other.is_ok()))),
    }
}
