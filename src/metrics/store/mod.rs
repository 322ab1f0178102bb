//! Persistence of buffered result records.
mod sqlite;

use serde::Serialize;

use crate::error::MetricsError;

pub use sqlite::SqliteStore;

/// Row shape handed to a [`ResultStore`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub run_id: String,
    pub timestamp_ms: i64,
    /// Zero for failed transfers.
    pub status_code: u16,
    /// Zero for failed transfers.
    pub latency_ms: f64,
    pub error: Option<String>,
    pub trace_data: Option<String>,
}

/// Batch sink for result rows.
pub trait ResultStore {
    /// Writes every row, all or nothing. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error when the batch could not be persisted; no row of the
    /// batch is stored in that case.
    fn add_results_batch(&mut self, rows: &[ResultRow]) -> Result<usize, MetricsError>;
}
