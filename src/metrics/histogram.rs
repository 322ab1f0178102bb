use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use std::io::Cursor;

use crate::error::MetricsError;

/// Lowest trackable latency, in microseconds.
pub const LOWEST_TRACKABLE_US: u64 = 1;
/// Highest trackable latency (one hour), in microseconds.
pub const HIGHEST_TRACKABLE_US: u64 = 3_600_000_000;
pub const SIGNIFICANT_FIGURES: u8 = 3;

fn histogram_error(
    context: &'static str,
) -> impl FnOnce(Box<dyn std::error::Error + Send + Sync>) -> MetricsError {
    move |source| MetricsError::Histogram { context, source }
}

/// Converts a latency in milliseconds to whole microseconds, clamped to the
/// trackable range.
#[must_use]
pub fn millis_to_micros(latency_ms: f64) -> u64 {
    if !latency_ms.is_finite() || latency_ms <= 0.0 {
        return LOWEST_TRACKABLE_US;
    }
    let micros = latency_ms * 1000.0;
    if micros >= HIGHEST_TRACKABLE_US as f64 {
        HIGHEST_TRACKABLE_US
    } else {
        (micros as u64).max(LOWEST_TRACKABLE_US)
    }
}

/// Latency distribution in microseconds over 1 µs ..= 1 h with three
/// significant figures.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let hist = Histogram::<u64>::new_with_bounds(
            LOWEST_TRACKABLE_US,
            HIGHEST_TRACKABLE_US,
            SIGNIFICANT_FIGURES,
        )
        .map_err(|err| histogram_error("create")(Box::new(err)))?;
        Ok(Self { hist })
    }

    /// Records a latency given in milliseconds. Out-of-range values are
    /// clamped rather than rejected.
    pub fn record_ms(&mut self, latency_ms: f64) {
        self.hist.saturating_record(millis_to_micros(latency_ms));
    }

    /// Merge another histogram into this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge fails.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<(), MetricsError> {
        self.hist
            .add(&other.hist)
            .map_err(|err| histogram_error("merge")(Box::new(err)))
    }

    /// Value at `quantile` (0.0 ..= 1.0) in milliseconds; zero when empty.
    #[must_use]
    pub fn quantile_ms(&self, quantile: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        micros_to_ms(self.hist.value_at_quantile(quantile))
    }

    #[must_use]
    pub fn min_ms(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        micros_to_ms(self.hist.min())
    }

    #[must_use]
    pub fn max_ms(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        micros_to_ms(self.hist.max())
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    pub fn reset(&mut self) {
        self.hist.reset();
    }

    /// Bytes held by the counts array.
    #[must_use]
    pub fn footprint_bytes(&self) -> usize {
        self.hist
            .distinct_values()
            .saturating_mul(std::mem::size_of::<u64>())
    }

    /// Encode the histogram as base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be serialized.
    pub fn encode_base64(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        V2Serializer::new()
            .serialize(&self.hist, &mut buffer)
            .map_err(|err| histogram_error("serialize")(Box::new(err)))?;
        Ok(B64.encode(buffer))
    }

    /// Decode a base64 histogram payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or deserialized.
    pub fn decode_base64(encoded: &str) -> Result<Self, MetricsError> {
        let bytes = B64
            .decode(encoded.as_bytes())
            .map_err(|err| histogram_error("decode")(Box::new(err)))?;
        let mut cursor = Cursor::new(bytes);
        let hist: Histogram<u64> = Deserializer::new()
            .deserialize(&mut cursor)
            .map_err(|err| histogram_error("deserialize")(Box::new(err)))?;
        Ok(Self { hist })
    }
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}
