use super::*;
use crate::error::{AppError, AppResult};
use crate::http::HttpMethod;
use crate::load::PlanMode;
use clap::Parser;
use std::time::Duration;

fn parse(argv: &[&str]) -> AppResult<VolleyArgs> {
    let full = std::iter::once("volley").chain(argv.iter().copied());
    Ok(VolleyArgs::try_parse_from(full)?)
}

fn fail(message: impl Into<String>) -> AppError {
    let message: String = message.into();
    AppError::validation(message)
}

#[test]
fn header_parsing_trims_both_sides() -> AppResult<()> {
    let (name, value) = parse_header("  X-Api-Key :  secret ")?;
    if name != "X-Api-Key" || value != "secret" {
        return Err(fail(format!("Parsed '{}' / '{}'", name, value)));
    }
    let (_, empty) = parse_header("X-Empty:")?;
    if !empty.is_empty() {
        return Err(fail("Empty header value should be kept"));
    }
    if parse_header("no-colon").is_ok() || parse_header(": value").is_ok() {
        return Err(fail("Malformed header accepted"));
    }
    Ok(())
}

#[test]
fn core_options_parse() -> AppResult<()> {
    let args = parse(&[
        "-u",
        "http://localhost:3000",
        "-X",
        "post",
        "-H",
        "A: 1",
        "-H",
        "B: 2",
        "-t",
        "90s",
        "-c",
        "12",
        "-r",
        "250.5",
        "--mode",
        "ramp-up",
        "--ramp-up",
        "15s",
    ])?;
    if args.url.as_deref() != Some("http://localhost:3000") || args.method != Some(HttpMethod::Post) {
        return Err(fail("Target not parsed"));
    }
    if args.headers.len() != 2 || args.duration != Some(Duration::from_secs(90)) {
        return Err(fail("Headers or duration not parsed"));
    }
    if args.concurrency.map(PositiveUsize::get) != Some(12)
        || args.mode != Some(PlanMode::RampUp)
        || args.ramp_up != Some(Duration::from_secs(15))
    {
        return Err(fail("Plan options not parsed"));
    }
    match args.rate {
        Some(rate) if (rate - 250.5).abs() < f64::EPSILON => Ok(()),
        other => Err(fail(format!("Unexpected rate {:?}", other))),
    }
}

#[test]
fn engine_and_output_options_parse() -> AppResult<()> {
    let args = parse(&[
        "--workers",
        "4",
        "--max-concurrent",
        "200",
        "--worker-rps",
        "50",
        "--burst",
        "10",
        "--db",
        "results.sqlite",
        "--run-id",
        "smoke",
        "-o",
        "json",
        "-k",
        "--no-follow-redirects",
    ])?;
    if args.workers.map(PositiveUsize::get) != Some(4)
        || args.max_concurrent.map(PositiveUsize::get) != Some(200)
    {
        return Err(fail("Engine sizing not parsed"));
    }
    if args.db.as_deref() != Some("results.sqlite")
        || args.run_id.as_deref() != Some("smoke")
        || args.output != Some(OutputFormat::Json)
    {
        return Err(fail("Persistence or output options not parsed"));
    }
    if !args.insecure || !args.no_follow_redirects {
        return Err(fail("Flags not parsed"));
    }
    Ok(())
}

#[test]
fn zero_and_negative_values_are_rejected() -> AppResult<()> {
    for argv in [
        ["-c", "0"],
        ["-n", "0"],
        ["--workers", "0"],
        ["-r", "-5"],
        ["-t", "0s"],
        ["-t", "5d"],
    ] {
        if parse(&argv).is_ok() {
            return Err(fail(format!("Accepted {:?}", argv)));
        }
    }
    Ok(())
}

#[test]
fn positive_wrappers_reject_zero() -> AppResult<()> {
    if PositiveU64::try_from(0).is_ok() || PositiveUsize::try_from(0).is_ok() {
        return Err(fail("Zero accepted"));
    }
    let value: PositiveU64 = "7".parse()?;
    if u64::from(value) != 7 {
        return Err(fail("Wrong value"));
    }
    Ok(())
}
