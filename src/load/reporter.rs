use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::http::EventLoop;
use crate::metrics::{LiveStats, MetricsCollector, ResultStore};

use super::context::RunContext;
use super::runner::RunOptions;

const MIN_TICK: Duration = Duration::from_millis(10);

/// Receives live progress of a run.
pub trait RunObserver: Sync {
    fn on_stats(&self, stats: &LiveStats);

    fn on_flush(&self, rows: usize) {
        debug!("Persisted {} result rows", rows);
    }
}

/// Periodic stats emission and buffer flushing, run on its own thread.
pub(super) struct Reporter<'run> {
    pub collector: &'run MetricsCollector,
    pub event_loop: &'run EventLoop,
    pub context: &'run RunContext,
    pub options: &'run RunOptions,
    pub observer: Option<&'run dyn RunObserver>,
}

impl Reporter<'_> {
    /// Loops until `done` fires, then hands the store back with the number
    /// of rows it persisted.
    pub(super) fn run<'store>(
        &self,
        done: &Receiver<()>,
        mut store: Option<&'store mut (dyn ResultStore + Send)>,
    ) -> (usize, Option<&'store mut (dyn ResultStore + Send)>) {
        let tick = self
            .options
            .stats_interval
            .min(self.options.flush_interval)
            .max(MIN_TICK);
        let mut last_stats = Instant::now();
        let mut last_flush = Instant::now();
        let mut flushed = 0usize;

        loop {
            match done.recv_timeout(tick) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if last_stats.elapsed() >= self.options.stats_interval {
                self.emit_stats();
                last_stats = Instant::now();
            }
            if let Some(target) = store.as_deref_mut()
                && last_flush.elapsed() >= self.options.flush_interval
            {
                flushed = flushed.saturating_add(self.flush(target));
                last_flush = Instant::now();
            }
        }
        (flushed, store)
    }

    pub(super) fn emit_stats(&self) {
        let stats = self.collector.get_current_stats(
            self.event_loop.active_count(),
            self.context.elapsed().as_secs_f64(),
            self.context.requests_sent(),
        );
        debug!(
            "Run {}: total={} errors={} throughput={:.1} active={} pending={}",
            self.context.run_id(),
            stats.total_requests,
            stats.total_errors,
            stats.throughput,
            stats.active_connections,
            self.event_loop.pending_count()
        );
        if let Some(observer) = self.observer {
            observer.on_stats(&stats);
        }
    }

    fn flush(&self, store: &mut (dyn ResultStore + Send)) -> usize {
        match self.collector.flush_to_database(store) {
            Ok(rows) => {
                if rows > 0
                    && let Some(observer) = self.observer
                {
                    observer.on_flush(rows);
                }
                rows
            }
            Err(err) => {
                warn!("Periodic flush for run {} failed: {}", self.context.run_id(), err);
                0
            }
        }
    }
}
