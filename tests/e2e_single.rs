mod support_single;

use std::time::Duration;

use tempfile::tempdir;

use support_single::{closed_port_url, run_volley, spawn_http_server_or_skip};
use volley::http::{EventLoop, EventLoopConfig, Request};
use volley::load::{LoadPlan, LoadRunner, RunContext, RunOptions, RunStatus};
use volley::metrics::{MetricsCollector, MetricsCollectorConfig, SqliteStore};

fn failure(output: &std::process::Output) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn e2e_single_worker_completes_every_request() -> Result<(), String> {
    let Some((url, _server)) = spawn_http_server_or_skip()? else {
        return Ok(());
    };
    let event_loop = EventLoop::new(EventLoopConfig {
        num_workers: 1,
        max_concurrent: 10,
        ..EventLoopConfig::default()
    })
    .map_err(|err| format!("event loop failed: {}", err))?;
    event_loop
        .start()
        .map_err(|err| format!("start failed: {}", err))?;

    let requests: Vec<Request> = (0..100)
        .map(|index| Request::get(format!("{}/item/{}", url, index)))
        .collect();
    let batch = event_loop.execute_batch(requests);
    event_loop.stop(true);

    if batch.successful != 100 || batch.failed != 0 {
        let first_error = batch
            .responses
            .iter()
            .find_map(|outcome| outcome.as_ref().err())
            .map(ToString::to_string);
        return Err(format!(
            "{} succeeded, {} failed, first error {:?}",
            batch.successful, batch.failed, first_error
        ));
    }
    if event_loop.total_processed() != 100 {
        return Err(format!("Processed {}", event_loop.total_processed()));
    }
    Ok(())
}

#[test]
fn e2e_runner_persists_results_to_sqlite() -> Result<(), String> {
    let Some((url, _server)) = spawn_http_server_or_skip()? else {
        return Ok(());
    };
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let db_path = dir.path().join("results.sqlite");

    let event_loop = EventLoop::new(EventLoopConfig {
        num_workers: 2,
        max_concurrent: 8,
        ..EventLoopConfig::default()
    })
    .map_err(|err| format!("event loop failed: {}", err))?;
    let collector = std::sync::Arc::new(
        MetricsCollector::new(
            "e2e-sqlite",
            MetricsCollectorConfig {
                store_success_traces: true,
                success_sample_rate: 1,
                save_timing_breakdown: true,
                ..MetricsCollectorConfig::default()
            },
        )
        .map_err(|err| format!("collector failed: {}", err))?,
    );
    let mut store =
        SqliteStore::open(&db_path).map_err(|err| format!("open store failed: {}", err))?;
    let runner = LoadRunner::new(
        &event_loop,
        collector,
        RunOptions {
            stats_interval: Duration::from_millis(50),
            flush_interval: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(10),
        },
    );
    let context = RunContext::new("e2e-sqlite");
    let plan = LoadPlan::Iterations {
        iterations: 40,
        concurrency: 8,
        target_rps: 0.0,
    };

    let report = runner
        .run(&Request::get(url), &plan, &context, Some(&mut store), None)
        .map_err(|err| format!("run failed: {}", err))?;
    event_loop.stop(true);

    if report.status != RunStatus::Completed || report.stats.total_success != 40 {
        return Err(format!("Unexpected report {:?}", report));
    }
    let reopened =
        SqliteStore::open(&db_path).map_err(|err| format!("reopen store failed: {}", err))?;
    let rows = reopened
        .count("e2e-sqlite")
        .map_err(|err| format!("count failed: {}", err))?;
    if rows != 40 {
        return Err(format!("Expected 40 stored rows, found {}", rows));
    }
    Ok(())
}

#[test]
fn e2e_cli_iterations_json_report() -> Result<(), String> {
    let Some((url, _server)) = spawn_http_server_or_skip()? else {
        return Ok(());
    };
    let output = run_volley([
        "-u",
        url.as_str(),
        "-n",
        "20",
        "-c",
        "5",
        "--workers",
        "1",
        "--run-id",
        "cli-json",
        "-o",
        "json",
        "--no-color",
    ])?;
    if !output.status.success() {
        return Err(failure(&output));
    }
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|err| format!("invalid JSON report ({}): {}", err, failure(&output)))?;
    if report.get("run_id") != Some(&serde_json::json!("cli-json"))
        || report.get("requests_sent") != Some(&serde_json::json!(20))
        || report.pointer("/stats/totalSuccess") != Some(&serde_json::json!(20))
    {
        return Err(format!("Unexpected report {}", report));
    }
    Ok(())
}

#[test]
fn e2e_cli_records_connection_errors() -> Result<(), String> {
    let url = closed_port_url()?;
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let db_path = dir.path().join("errors.sqlite");
    let db_arg = db_path.to_string_lossy().into_owned();

    let output = run_volley([
        "-u",
        url.as_str(),
        "-n",
        "10",
        "-c",
        "5",
        "--workers",
        "1",
        "--timeout",
        "2s",
        "--run-id",
        "cli-errors",
        "--db",
        db_arg.as_str(),
    ])?;
    if !output.status.success() {
        return Err(failure(&output));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.contains("errors: 10 (100.00%)") {
        return Err(failure(&output));
    }
    let store = SqliteStore::open(&db_path).map_err(|err| format!("open store failed: {}", err))?;
    let rows = store
        .count("cli-errors")
        .map_err(|err| format!("count failed: {}", err))?;
    if rows != 10 {
        return Err(format!("Expected 10 error rows, found {}", rows));
    }
    Ok(())
}
