//! Run-wide aggregation of transfer outcomes.
//!
//! Counters are atomics; variable-size data (exact status codes, buffered
//! records, samples) sits behind one mutex per purpose, and the latency
//! histogram is striped so concurrent recorders rarely share a lock.
mod atomic;
mod trace;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{ErrorCode, MetricsError};
use crate::http::{Response, TransferResult};

use super::histogram::LatencyHistogram;
use super::store::{ResultRow, ResultStore};
use super::types::{
    LiveStats, MetricsCollectorConfig, Outcome, Percentiles, ResponseSample, ResultRecord,
};
use atomic::AtomicF64;

const MAX_STRIPES: usize = 8;
const PREALLOCATION_CAP: usize = 10_000;

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE: Cell<Option<usize>> = const { Cell::new(None) };
}

fn stripe_index() -> usize {
    STRIPE.with(|slot| {
        slot.get().unwrap_or_else(|| {
            let index = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed);
            slot.set(Some(index));
            index
        })
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn per_second(count: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds > 0.0 {
        count as f64 / elapsed_seconds
    } else {
        0.0
    }
}

/// Aggregates outcomes for one run. Shared by every worker via `Arc`.
#[derive(Debug)]
pub struct MetricsCollector {
    run_id: String,
    config: MetricsCollectorConfig,
    created: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    latency_count: AtomicU64,
    latency_sum_ms: AtomicF64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    successes_seen: AtomicU64,
    responses_seen: AtomicU64,
    histograms: Vec<Mutex<LatencyHistogram>>,
    status_codes: Mutex<BTreeMap<u16, u64>>,
    errors: Mutex<Vec<ResultRecord>>,
    success_samples: Mutex<Vec<ResultRecord>>,
    response_samples: Mutex<Vec<ResponseSample>>,
}

impl MetricsCollector {
    /// # Errors
    ///
    /// Returns an error if the latency histograms cannot be allocated.
    pub fn new(
        run_id: impl Into<String>,
        config: MetricsCollectorConfig,
    ) -> Result<Self, MetricsError> {
        let stripes = std::thread::available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .clamp(1, MAX_STRIPES);
        let histograms = (0..stripes)
            .map(|_| LatencyHistogram::new().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        let error_capacity = if config.max_errors == 0 {
            config.expected_requests.min(PREALLOCATION_CAP) / 100
        } else {
            config.max_errors.min(PREALLOCATION_CAP)
        };
        let success_capacity = if !config.store_success_traces {
            0
        } else if config.max_success_results == 0 {
            usize::try_from(config.success_sample_rate.max(1))
                .map_or(0, |rate| config.expected_requests.min(PREALLOCATION_CAP) / rate)
        } else {
            config.max_success_results.min(PREALLOCATION_CAP)
        };

        Ok(Self {
            run_id: run_id.into(),
            created: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_sum_ms: AtomicF64::default(),
            status_2xx: AtomicU64::new(0),
            status_3xx: AtomicU64::new(0),
            status_4xx: AtomicU64::new(0),
            status_5xx: AtomicU64::new(0),
            successes_seen: AtomicU64::new(0),
            responses_seen: AtomicU64::new(0),
            histograms,
            status_codes: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(Vec::with_capacity(error_capacity)),
            success_samples: Mutex::new(Vec::with_capacity(success_capacity)),
            response_samples: Mutex::new(Vec::new()),
            config,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub const fn config(&self) -> &MetricsCollectorConfig {
        &self.config
    }

    /// Records a completed request that produced an HTTP response.
    pub fn record_success(&self, status_code: u16, latency_ms: f64, trace: Option<&str>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
        self.bump_status_class(status_code);
        {
            let mut status_codes = lock(&self.status_codes);
            let count = status_codes.entry(status_code).or_insert(0);
            *count = count.saturating_add(1);
        }

        let Some(trace) = trace else {
            return;
        };
        if !self.config.store_success_traces {
            return;
        }
        let seen = self.successes_seen.fetch_add(1, Ordering::Relaxed);
        if seen
            .checked_rem(self.config.success_sample_rate.max(1))
            .unwrap_or(0)
            != 0
        {
            return;
        }
        let mut samples = lock(&self.success_samples);
        if self.config.max_success_results == 0 || samples.len() < self.config.max_success_results
        {
            samples.push(ResultRecord {
                timestamp_ms: now_ms(),
                outcome: Outcome::Success {
                    status_code,
                    latency_ms,
                },
                trace: Some(trace.to_owned()),
            });
        }
    }

    /// Records a failed request. Errors are never sampled; they are kept
    /// until `max_errors` records are buffered (no cap when zero).
    pub fn record_error(&self, code: ErrorCode, message: &str, trace: Option<&str>) {
        self.count_error();
        self.buffer_error(code, message, trace);
    }

    /// Counts one failed request; returns its 1-based request number.
    fn count_error(&self) -> u64 {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.total_requests
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    fn buffer_error(&self, code: ErrorCode, message: &str, trace: Option<&str>) {
        let mut errors = lock(&self.errors);
        if self.config.max_errors == 0 || errors.len() < self.config.max_errors {
            errors.push(ResultRecord {
                timestamp_ms: now_ms(),
                outcome: Outcome::Failure {
                    code,
                    message: message.to_owned(),
                },
                trace: trace.map(str::to_owned),
            });
        }
    }

    /// Adds a latency sample without touching request counters.
    pub fn record_latency(&self, latency_ms: f64) {
        let latency_ms = if latency_ms.is_finite() {
            latency_ms.max(0.0)
        } else {
            0.0
        };
        self.latency_sum_ms.fetch_add(latency_ms);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        let stripe = stripe_index()
            .checked_rem(self.histograms.len())
            .unwrap_or(0);
        if let Some(histogram) = self.histograms.get(stripe) {
            lock(histogram).record_ms(latency_ms);
        }
    }

    /// Keeps one response per `response_sample_rate`, up to
    /// `max_response_samples`.
    pub fn record_response_sample(&self, response: &Response) {
        let seen = self.responses_seen.fetch_add(1, Ordering::Relaxed);
        if seen
            .checked_rem(self.config.response_sample_rate.max(1))
            .unwrap_or(0)
            != 0
        {
            return;
        }
        let mut samples = lock(&self.response_samples);
        if samples.len() >= self.config.max_response_samples {
            return;
        }
        samples.push(ResponseSample {
            status_code: response.status_code,
            status_text: response.status_text.clone(),
            body: response.body_text(),
            headers: response.headers.clone(),
            latency_ms: response.timing.total_ms,
            timestamp_ms: now_ms(),
        });
    }

    /// Records a transfer outcome, building its trace payload.
    pub fn record_result(&self, result: &TransferResult) {
        match result {
            Ok(response) => {
                let trace = trace::success_trace(&self.config, &response.timing);
                self.record_success(
                    response.status_code,
                    response.timing.total_ms,
                    trace.as_deref(),
                );
                if self.config.sample_responses {
                    self.record_response_sample(response);
                }
            }
            Err(error) => {
                let request_number = self.count_error();
                let trace = trace::error_trace(error, request_number);
                self.buffer_error(error.code, &error.message, Some(&trace));
            }
        }
    }

    fn bump_status_class(&self, status_code: u16) {
        let counter = match status_code {
            200..=299 => &self.status_2xx,
            300..=399 => &self.status_3xx,
            400..=499 => &self.status_4xx,
            500..=599 => &self.status_5xx,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.total_requests().saturating_sub(self.total_errors())
    }

    #[must_use]
    pub fn latency_count(&self) -> u64 {
        self.latency_count.load(Ordering::Relaxed)
    }

    /// Mean recorded latency in milliseconds; zero before any sample.
    #[must_use]
    pub fn average_latency(&self) -> f64 {
        let count = self.latency_count();
        if count == 0 {
            return 0.0;
        }
        self.latency_sum_ms.load() / count as f64
    }

    /// Error share as a percentage.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.total_errors() as f64 * 100.0 / total as f64
    }

    fn merged_histogram(&self) -> Result<LatencyHistogram, MetricsError> {
        let mut merged = LatencyHistogram::new()?;
        for stripe in &self.histograms {
            merged.merge(&lock(stripe))?;
        }
        Ok(merged)
    }

    /// Latency percentiles in milliseconds; all zero before any sample.
    #[must_use]
    pub fn calculate_percentiles(&self) -> Percentiles {
        let merged = match self.merged_histogram() {
            Ok(merged) => merged,
            Err(err) => {
                warn!("Failed to merge latency histograms: {}", err);
                return Percentiles::default();
            }
        };
        Percentiles {
            min: merged.min_ms(),
            p50: merged.quantile_ms(0.50),
            p75: merged.quantile_ms(0.75),
            p90: merged.quantile_ms(0.90),
            p95: merged.quantile_ms(0.95),
            p99: merged.quantile_ms(0.99),
            p999: merged.quantile_ms(0.999),
            max: merged.max_ms(),
        }
    }

    /// Merged latency histogram, base64 V2-serialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the stripes cannot be merged or serialized.
    pub fn export_histogram(&self) -> Result<String, MetricsError> {
        self.merged_histogram()?.encode_base64()
    }

    #[must_use]
    pub fn status_code_distribution(&self) -> BTreeMap<u16, u64> {
        lock(&self.status_codes).clone()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ResultRecord> {
        lock(&self.errors).clone()
    }

    #[must_use]
    pub fn success_samples(&self) -> Vec<ResultRecord> {
        lock(&self.success_samples).clone()
    }

    #[must_use]
    pub fn response_samples(&self) -> Vec<ResponseSample> {
        lock(&self.response_samples).clone()
    }

    /// Counter snapshot for live reporting. Takes no lock.
    #[must_use]
    pub fn get_current_stats(
        &self,
        active_connections: usize,
        elapsed_seconds: f64,
        requests_sent: u64,
    ) -> LiveStats {
        let total_requests = self.total_requests();
        LiveStats {
            total_requests,
            total_errors: self.total_errors(),
            total_success: self.success_count(),
            error_rate: self.error_rate(),
            avg_latency_ms: self.average_latency(),
            send_rate: per_second(requests_sent, elapsed_seconds),
            throughput: per_second(total_requests, elapsed_seconds),
            active_connections,
            elapsed_seconds,
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_3xx: self.status_3xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
        }
    }

    /// Seconds since the collector was created.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.created.elapsed().as_secs_f64()
    }

    /// Writes buffered error and sampled success records as one batch and
    /// clears the buffers. On failure the records are put back so a later
    /// flush can retry them.
    ///
    /// # Errors
    ///
    /// Returns the store's error when the batch could not be written.
    pub fn flush_to_database(&self, store: &mut dyn ResultStore) -> Result<usize, MetricsError> {
        let errors = mem::take(&mut *lock(&self.errors));
        let successes = mem::take(&mut *lock(&self.success_samples));
        if errors.is_empty() && successes.is_empty() {
            return Ok(0);
        }

        let rows: Vec<ResultRow> = errors
            .iter()
            .chain(successes.iter())
            .map(|record| self.to_row(record))
            .collect();

        match store.add_results_batch(&rows) {
            Ok(written) => {
                debug!("Flushed {} records for run {}", written, self.run_id);
                Ok(written)
            }
            Err(err) => {
                warn!("Failed to flush records for run {}: {}", self.run_id, err);
                restore(&self.errors, errors);
                restore(&self.success_samples, successes);
                Err(err)
            }
        }
    }

    fn to_row(&self, record: &ResultRecord) -> ResultRow {
        let (status_code, latency_ms, error) = match &record.outcome {
            Outcome::Success {
                status_code,
                latency_ms,
            } => (*status_code, *latency_ms, None),
            Outcome::Failure { message, .. } => (0, 0.0, Some(message.clone())),
        };
        ResultRow {
            run_id: self.run_id.clone(),
            timestamp_ms: record.timestamp_ms,
            status_code,
            latency_ms,
            error,
            trace_data: record.trace.clone(),
        }
    }

    /// Approximate bytes held by this collector.
    #[must_use]
    pub fn memory_usage_bytes(&self) -> usize {
        let record_size = mem::size_of::<ResultRecord>();
        let records = |buffer: &Mutex<Vec<ResultRecord>>| {
            let buffer = lock(buffer);
            buffer
                .iter()
                .fold(buffer.capacity().saturating_mul(record_size), |acc, record| {
                    acc.saturating_add(record.heap_bytes())
                })
        };
        let histograms = self.histograms.iter().fold(0usize, |acc, stripe| {
            acc.saturating_add(lock(stripe).footprint_bytes())
        });
        let status_codes = lock(&self.status_codes)
            .len()
            .saturating_mul(mem::size_of::<(u16, u64)>());
        let samples = {
            let samples = lock(&self.response_samples);
            samples.iter().fold(
                samples
                    .capacity()
                    .saturating_mul(mem::size_of::<ResponseSample>()),
                |acc, sample| acc.saturating_add(sample.heap_bytes()),
            )
        };

        mem::size_of::<Self>()
            .saturating_add(self.run_id.capacity())
            .saturating_add(histograms)
            .saturating_add(status_codes)
            .saturating_add(records(&self.errors))
            .saturating_add(records(&self.success_samples))
            .saturating_add(samples)
    }
}

fn restore(buffer: &Mutex<Vec<ResultRecord>>, mut drained: Vec<ResultRecord>) {
    let mut current = lock(buffer);
    drained.append(&mut current);
    *current = drained;
}
