use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared state of one load run.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    stop: Arc<AtomicBool>,
    requests_sent: AtomicU64,
    requests_expected: AtomicU64,
    started: Instant,
}

impl RunContext {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self::with_stop_flag(run_id, Arc::new(AtomicBool::new(false)))
    }

    /// Builds a context whose stop flag is shared with a signal handler.
    #[must_use]
    pub fn with_stop_flag(run_id: impl Into<String>, stop: Arc<AtomicBool>) -> Self {
        Self {
            run_id: run_id.into(),
            stop,
            requests_sent: AtomicU64::new(0),
            requests_expected: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn requests_expected(&self) -> u64 {
        self.requests_expected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_expected(&self, expected: u64) {
        self.requests_expected.store(expected, Ordering::Relaxed);
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Run identifier derived from the current UTC time.
#[must_use]
pub fn generate_run_id() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f"))
}
