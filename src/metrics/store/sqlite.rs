use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::MetricsError;

use super::{ResultRow, ResultStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        status_code INTEGER NOT NULL,
        latency_ms REAL NOT NULL,
        error TEXT,
        trace_data TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_results_run_id ON results(run_id);";

fn db_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> MetricsError {
    move |source| MetricsError::Database { context, source }
}

/// SQLite-backed [`ResultStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database file in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or initialised.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let conn = Connection::open(path.as_ref()).map_err(db_error("open sqlite db"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(db_error("set sqlite busy timeout"))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(db_error("configure sqlite pragmas"))?;
        Self::initialise(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, MetricsError> {
        let conn = Connection::open_in_memory().map_err(db_error("open sqlite db"))?;
        Self::initialise(conn)
    }

    fn initialise(conn: Connection) -> Result<Self, MetricsError> {
        conn.execute_batch(SCHEMA)
            .map_err(db_error("initialize sqlite db"))?;
        Ok(Self { conn })
    }

    /// Number of stored rows for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub fn count(&self, run_id: &str) -> Result<u64, MetricsError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM results WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(db_error("count sqlite results"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Stored rows for `run_id` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub fn load_results(&self, run_id: &str) -> Result<Vec<ResultRow>, MetricsError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, timestamp_ms, status_code, latency_ms, error, trace_data
                 FROM results WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(db_error("prepare sqlite query"))?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let status: i64 = row.get(2)?;
                Ok(ResultRow {
                    run_id: row.get(0)?,
                    timestamp_ms: row.get(1)?,
                    status_code: u16::try_from(status).unwrap_or(0),
                    latency_ms: row.get(3)?,
                    error: row.get(4)?,
                    trace_data: row.get(5)?,
                })
            })
            .map_err(db_error("query sqlite results"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_error("read sqlite results"))
    }
}

impl ResultStore for SqliteStore {
    fn add_results_batch(&mut self, rows: &[ResultRow]) -> Result<usize, MetricsError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self
            .conn
            .transaction()
            .map_err(db_error("begin sqlite transaction"))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO results (run_id, timestamp_ms, status_code, latency_ms, error, trace_data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_error("prepare sqlite insert"))?;
            for row in rows {
                stmt.execute(params![
                    row.run_id,
                    row.timestamp_ms,
                    i64::from(row.status_code),
                    row.latency_ms,
                    row.error,
                    row.trace_data
                ])
                .map_err(db_error("insert sqlite result"))?;
            }
        }
        tx.commit().map_err(db_error("commit sqlite transaction"))?;
        debug!("Persisted {} result rows", rows.len());
        Ok(rows.len())
    }
}
