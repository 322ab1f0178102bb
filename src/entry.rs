//! Binary entry point: CLI and config resolution, signal wiring, the run
//! itself and report printing.
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use crate::args::{OutputFormat, VolleyArgs};
use crate::config::{RunSettings, load_config, resolve_settings};
use crate::error::AppResult;
use crate::http::{DEFAULT_STOP_GRACE, EventLoop};
use crate::load::{LoadRunner, RunContext, RunObserver, RunReport, generate_run_id};
use crate::metrics::{LiveStats, MetricsCollector, ResultStore, SqliteStore};
use crate::shutdown::{setup_signal_shutdown_handler, shutdown_channel};

/// Time given to the signal runtime to wind down after a run.
const SIGNAL_RUNTIME_GRACE: Duration = Duration::from_millis(100);

/// Logs each live snapshot as one line.
struct LogObserver;

impl RunObserver for LogObserver {
    fn on_stats(&self, stats: &LiveStats) {
        info!(
            "t={:.1}s sent/s={:.1} done/s={:.1} active={} total={} errors={} ({:.2}%) avg={:.2}ms",
            stats.elapsed_seconds,
            stats.send_rate,
            stats.throughput,
            stats.active_connections,
            stats.total_requests,
            stats.total_errors,
            stats.error_rate,
            stats.avg_latency_ms
        );
    }
}

/// Parses the command line, runs the load test and prints the report.
///
/// # Errors
///
/// Returns an error when configuration is invalid or the run cannot start.
pub fn run() -> AppResult<()> {
    let args = VolleyArgs::parse();
    crate::logger::init_logging(args.verbose, args.no_color);

    let config = load_config(args.config.as_deref())?;
    let settings = resolve_settings(&args, config.as_ref())?;
    let report = execute(&settings)?;
    print_report(&report, settings.output)
}

/// Runs one load test described by `settings`.
///
/// Ctrl+C or SIGTERM stops submission; in-flight requests are drained and
/// buffered results are still flushed.
///
/// # Errors
///
/// Returns an error when the engine, collector or store cannot be created,
/// or the run itself fails.
pub fn execute(settings: &RunSettings) -> AppResult<RunReport> {
    let run_id = settings.run_id.clone().unwrap_or_else(generate_run_id);

    let signal_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("volley-signal")
        .enable_all()
        .build()?;
    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let context = RunContext::with_stop_flag(run_id.clone(), Arc::new(AtomicBool::new(false)));
    let signal_task = {
        let _guard = signal_runtime.enter();
        setup_signal_shutdown_handler(&shutdown_tx, context.stop_flag())
    };

    let event_loop = EventLoop::new(settings.event_loop.clone())?;
    let collector = Arc::new(MetricsCollector::new(run_id, settings.metrics.clone())?);
    let mut store = settings
        .db_path
        .as_ref()
        .map(SqliteStore::open)
        .transpose()?;
    if let Some(path) = settings.db_path.as_ref() {
        debug!("Persisting results to {}", path.display());
    }

    let runner = LoadRunner::new(&event_loop, collector, settings.options);
    let outcome = runner.run(
        &settings.request,
        &settings.plan,
        &context,
        store
            .as_mut()
            .map(|store| store as &mut (dyn ResultStore + Send)),
        Some(&LogObserver),
    );

    let drained = outcome.as_ref().is_ok_and(|report| report.drained);
    if !drained {
        warn!("Cancelling requests still queued at shutdown");
    }
    if !event_loop.stop_within(drained, DEFAULT_STOP_GRACE) {
        warn!(
            "Detached event loop workers still busy after {:?}",
            DEFAULT_STOP_GRACE
        );
    }

    drop(shutdown_tx.send(()));
    signal_task.abort();
    signal_runtime.shutdown_timeout(SIGNAL_RUNTIME_GRACE);
    outcome
}

fn print_report(report: &RunReport, format: OutputFormat) -> AppResult<()> {
    match format {
        OutputFormat::Text => {
            for line in report.summary_lines() {
                println!("{}", line);
            }
        }
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}
