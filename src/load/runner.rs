use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, HttpError};
use crate::http::{EventLoop, RateLimiter, RateLimiterConfig, Request};
use crate::metrics::{MetricsCollector, ResultStore};

use super::context::RunContext;
use super::plan::{BACKPRESSURE_PAUSE, LoadPlan, SUBMIT_TICK};
use super::report::{RunReport, RunStatus};
use super::reporter::{Reporter, RunObserver};

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const DRAIN_POLL: Duration = Duration::from_millis(10);
const QUEUE_FULL_PAUSE: Duration = Duration::from_millis(1);
/// Dispatcher burst, in seconds of the target rate.
const DISPATCH_BURST_SECS: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub stats_interval: Duration,
    pub flush_interval: Duration,
    /// Upper bound on the wait for in-flight requests after dispatch ends.
    pub drain_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stats_interval: DEFAULT_STATS_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Drives a [`LoadPlan`] through an [`EventLoop`] on the calling thread.
pub struct LoadRunner<'run> {
    event_loop: &'run EventLoop,
    collector: Arc<MetricsCollector>,
    options: RunOptions,
}

impl<'run> LoadRunner<'run> {
    #[must_use]
    pub const fn new(
        event_loop: &'run EventLoop,
        collector: Arc<MetricsCollector>,
        options: RunOptions,
    ) -> Self {
        Self {
            event_loop,
            collector,
            options,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `plan` to completion (or until the context is stopped), waits
    /// for in-flight requests, and flushes buffered results to `store`.
    ///
    /// Starts the event loop if it is not running. The loop is left running
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error when the plan is invalid, the event loop or the
    /// reporter thread cannot start, or the final flush fails.
    pub fn run(
        &self,
        request: &Request,
        plan: &LoadPlan,
        context: &RunContext,
        store: Option<&mut (dyn ResultStore + Send)>,
        observer: Option<&dyn RunObserver>,
    ) -> AppResult<RunReport> {
        plan.validate().map_err(AppError::validation)?;
        if !self.event_loop.is_running() {
            self.event_loop.start()?;
        }
        self.event_loop.attach_metrics(Arc::clone(&self.collector));
        context.set_expected(plan.expected_requests());
        let baseline = self.collector.total_requests();
        info!(
            "Run {} started: {} plan against {} {}",
            context.run_id(),
            plan.mode().as_str(),
            request.method,
            request.url
        );

        let reporter = Reporter {
            collector: &self.collector,
            event_loop: self.event_loop,
            context,
            options: &self.options,
            observer,
        };
        let reporter_ref = &reporter;
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let (flushed, drained, store) = thread::scope(|scope| -> AppResult<_> {
            let handle = thread::Builder::new()
                .name("volley-reporter".to_owned())
                .spawn_scoped(scope, move || reporter_ref.run(&done_rx, store))?;
            self.dispatch(request, plan, context);
            let drained = self.drain(context, baseline);
            drop(done_tx.send(()));
            let (flushed, store) = handle
                .join()
                .map_err(|_panic| AppError::http(HttpError::TaskPanicked))?;
            Ok((flushed, drained, store))
        })?;

        let mut flushed_records = flushed;
        if let Some(store) = store {
            let rows = self.collector.flush_to_database(store)?;
            flushed_records = flushed_records.saturating_add(rows);
        }
        reporter.emit_stats();
        drop(self.event_loop.detach_metrics());

        let elapsed = context.elapsed().as_secs_f64();
        let status = if context.should_stop() {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        let report = RunReport {
            run_id: context.run_id().to_owned(),
            mode: plan.mode(),
            status,
            duration_secs: elapsed,
            requests_sent: context.requests_sent(),
            requests_expected: context.requests_expected(),
            drained,
            stats: self.collector.get_current_stats(
                self.event_loop.active_count(),
                elapsed,
                context.requests_sent(),
            ),
            percentiles: self.collector.calculate_percentiles(),
            status_codes: self.collector.status_code_distribution(),
            flushed_records,
        };
        info!(
            "Run {} {}: {} sent, {} completed in {:.2}s",
            report.run_id,
            report.status.as_str(),
            report.requests_sent,
            report.stats.total_requests,
            report.duration_secs
        );
        Ok(report)
    }

    fn dispatch(&self, request: &Request, plan: &LoadPlan, context: &RunContext) {
        let limiter = dispatcher_limiter(plan.target_rps());
        let max_pending = plan.max_pending();
        match plan {
            LoadPlan::Constant {
                duration,
                target_rps,
                concurrency,
            } => {
                if *target_rps > 0.0 {
                    self.paced(request, context, *duration, &limiter, max_pending);
                } else {
                    self.ticked(request, context, *duration, max_pending, |_| *concurrency);
                }
            }
            LoadPlan::Iterations {
                iterations,
                concurrency,
                ..
            } => self.iterations(
                request,
                context,
                *iterations,
                *concurrency,
                &limiter,
                max_pending,
            ),
            LoadPlan::RampUp {
                duration,
                ramp_duration,
                start_concurrency,
                target_concurrency,
            } => self.ticked(request, context, *duration, max_pending, |elapsed| {
                LoadPlan::ramp_concurrency(
                    elapsed,
                    *ramp_duration,
                    *start_concurrency,
                    *target_concurrency,
                )
            }),
        }
        debug!(
            "Run {} dispatched {} requests",
            context.run_id(),
            context.requests_sent()
        );
    }

    fn submit(&self, request: &Request, context: &RunContext) {
        self.event_loop.submit(request.clone(), |_id, _result| {});
        context.record_sent();
    }

    fn paced(
        &self,
        request: &Request,
        context: &RunContext,
        duration: Duration,
        limiter: &RateLimiter,
        max_pending: usize,
    ) {
        let started = Instant::now();
        while !context.should_stop() && started.elapsed() < duration {
            if self.event_loop.pending_count() >= max_pending {
                thread::sleep(QUEUE_FULL_PAUSE);
                continue;
            }
            if !wait_for_token(limiter, context) || started.elapsed() >= duration {
                break;
            }
            self.submit(request, context);
        }
    }

    fn ticked<F>(
        &self,
        request: &Request,
        context: &RunContext,
        duration: Duration,
        max_pending: usize,
        batch_size: F,
    ) where
        F: Fn(Duration) -> usize,
    {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if context.should_stop() || elapsed >= duration {
                break;
            }
            if self.event_loop.pending_count() > max_pending {
                thread::sleep(BACKPRESSURE_PAUSE);
                continue;
            }
            for _ in 0..batch_size(elapsed) {
                if context.should_stop() {
                    break;
                }
                self.submit(request, context);
            }
            thread::sleep(SUBMIT_TICK);
        }
    }

    fn iterations(
        &self,
        request: &Request,
        context: &RunContext,
        iterations: u64,
        concurrency: usize,
        limiter: &RateLimiter,
        max_pending: usize,
    ) {
        let batch_limit = u64::try_from(concurrency).unwrap_or(u64::MAX);
        let mut submitted = 0u64;
        while submitted < iterations && !context.should_stop() {
            if self.event_loop.pending_count() > max_pending {
                thread::sleep(SUBMIT_TICK);
                continue;
            }
            let batch = iterations.saturating_sub(submitted).min(batch_limit);
            for _ in 0..batch {
                if context.should_stop() || !wait_for_token(limiter, context) {
                    return;
                }
                self.submit(request, context);
                submitted = submitted.saturating_add(1);
            }
            if submitted < iterations {
                thread::sleep(SUBMIT_TICK);
            }
        }
    }

    /// Waits until every dispatched request has been recorded. Returns
    /// `false` when the drain timeout expired first.
    fn drain(&self, context: &RunContext, baseline: u64) -> bool {
        let deadline = Instant::now().checked_add(self.options.drain_timeout);
        loop {
            let completed = self.collector.total_requests().saturating_sub(baseline);
            if completed >= context.requests_sent() {
                return true;
            }
            if deadline.is_none_or(|deadline| Instant::now() >= deadline) {
                warn!(
                    "Run {} drain timed out with {} of {} requests completed",
                    context.run_id(),
                    completed,
                    context.requests_sent()
                );
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
    }
}

fn dispatcher_limiter(target_rps: f64) -> RateLimiter {
    if target_rps > 0.0 {
        RateLimiter::new(RateLimiterConfig::new(
            target_rps,
            (target_rps * DISPATCH_BURST_SECS).max(1.0),
        ))
    } else {
        RateLimiter::disabled()
    }
}

/// Takes one dispatcher token, sleeping in slices so a stop request is
/// noticed. Returns `false` when the run was stopped first.
fn wait_for_token(limiter: &RateLimiter, context: &RunContext) -> bool {
    loop {
        if limiter.try_acquire() {
            return true;
        }
        if context.should_stop() {
            return false;
        }
        thread::sleep(limiter.time_until_available().min(BACKPRESSURE_PAUSE));
    }
}
