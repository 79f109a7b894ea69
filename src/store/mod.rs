//! Persistence for log and summary records
//!
//! The interceptor and the aggregation job only talk to [`LogStore`]; the
//! concrete backends are:
//! - [`SqliteStore`]: the production store (WAL-mode SQLite, embedded migrations)
//! - [`MemoryStore`]: an in-process store used by tests and dry runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    Checkpoint, EndpointErrorCount, EndpointLatencyStats, LogQuery, LogRecord, StoredLogRecord,
    StoredSummaryRecord, SummaryRecord,
};

/// Append-only store for request logs and their summaries
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one log record
    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// Filtered log query, newest first
    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<StoredLogRecord>, StoreError>;

    /// Count of records with `status_code >= threshold`, grouped by endpoint,
    /// highest count first
    async fn count_by_endpoint_where(
        &self,
        threshold: u16,
    ) -> Result<Vec<EndpointErrorCount>, StoreError>;

    /// Average/max latency and request count per endpoint, slowest first
    async fn stats_by_endpoint(&self) -> Result<Vec<EndpointLatencyStats>, StoreError>;

    /// Append one summary record
    async fn insert_summary(&self, record: &SummaryRecord) -> Result<(), StoreError>;

    /// All records with `start <= timestamp < end` (`<= end` when `end_inclusive`)
    async fn logs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        end_inclusive: bool,
    ) -> Result<Vec<LogRecord>, StoreError>;

    /// Last committed aggregation boundary for `job_name`
    async fn high_water_mark(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Write `summaries` and, if given, advance the checkpoint, atomically
    async fn commit_summaries(
        &self,
        summaries: &[SummaryRecord],
        checkpoint: Option<&Checkpoint>,
    ) -> Result<(), StoreError>;

    /// Stored summaries, newest window first
    async fn query_summaries(&self, limit: usize) -> Result<Vec<StoredSummaryRecord>, StoreError>;
}

/// Truncate an instant to the millisecond precision the stores persist
pub fn to_store_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    // Millis taken from a valid instant are always in range
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Decode a persisted Unix-millisecond timestamp
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}
