//! SQLite store
//!
//! - WAL mode so the request logger and analytics reads do not block each other
//! - Schema applied from `./migrations` on open
//! - Timestamps persisted as Unix milliseconds

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{from_millis, LogStore};
use crate::error::StoreError;
use crate::models::{
    Checkpoint, EndpointErrorCount, EndpointLatencyStats, LogQuery, LogRecord, Stored,
    StoredLogRecord, StoredSummaryRecord, SummaryRecord,
};

const LOG_COLUMNS: &str =
    "id, timestamp, method, endpoint, status_code, latency_ms, error_message, user_agent";

const INSERT_LOG: &str = "INSERT INTO api_logs
    (timestamp, method, endpoint, status_code, latency_ms, error_message, user_agent)
    VALUES (?, ?, ?, ?, ?, ?, ?)";

const INSERT_SUMMARY: &str = "INSERT INTO api_log_summaries
    (window_start, window_end, endpoint, status_code, request_count, avg_latency, error_count)
    VALUES (?, ?, ?, ?, ?, ?, ?)";

const SELECT_WINDOW_EXCLUSIVE: &str = "SELECT
    timestamp, method, endpoint, status_code, latency_ms, error_message, user_agent
    FROM api_logs WHERE timestamp >= ? AND timestamp < ? ORDER BY timestamp ASC";

const SELECT_WINDOW_INCLUSIVE: &str = "SELECT
    timestamp, method, endpoint, status_code, latency_ms, error_message, user_agent
    FROM api_logs WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC";

const SELECT_SUMMARIES: &str = "SELECT
    id, window_start, window_end, endpoint, status_code, request_count, avg_latency, error_count
    FROM api_log_summaries
    ORDER BY window_end DESC, endpoint ASC, status_code ASC
    LIMIT ?";

/// SQLite-backed [`LogStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect using a database URL (e.g. `sqlite:./data/api_monitor.db` or `sqlite::memory:`)
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect(options, in_memory).await
    }

    /// Open (creating if needed) a database file, including its parent directory
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new().filename(path);
        Self::connect(options, false).await
    }

    async fn connect(options: SqliteConnectOptions, in_memory: bool) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        // Every connection to :memory: is a separate database, so keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Store migrations completed");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, failing every later operation
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn log_from_row(row: &SqliteRow) -> Result<LogRecord, StoreError> {
    Ok(LogRecord {
        timestamp: from_millis(row.try_get("timestamp")?)?,
        method: row.try_get("method")?,
        endpoint: row.try_get("endpoint")?,
        status_code: row.try_get::<i64, _>("status_code")? as u16,
        latency_ms: row.try_get("latency_ms")?,
        error_message: row.try_get("error_message")?,
        user_agent: row.try_get("user_agent")?,
    })
}

fn stored_log_from_row(row: &SqliteRow) -> Result<StoredLogRecord, StoreError> {
    Ok(Stored::new(row.try_get("id")?, log_from_row(row)?))
}

fn stored_summary_from_row(row: &SqliteRow) -> Result<StoredSummaryRecord, StoreError> {
    Ok(Stored::new(row.try_get("id")?, summary_from_row(row)?))
}

fn summary_from_row(row: &SqliteRow) -> Result<SummaryRecord, StoreError> {
    Ok(SummaryRecord {
        window_start: from_millis(row.try_get("window_start")?)?,
        window_end: from_millis(row.try_get("window_end")?)?,
        endpoint: row.try_get("endpoint")?,
        status_code: row.try_get::<i64, _>("status_code")? as u16,
        request_count: row.try_get::<i64, _>("request_count")? as u64,
        avg_latency: row.try_get("avg_latency")?,
        error_count: row.try_get::<i64, _>("error_count")? as u64,
    })
}

async fn insert_summary_with<'e, E>(executor: E, record: &SummaryRecord) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(INSERT_SUMMARY)
        .bind(record.window_start.timestamp_millis())
        .bind(record.window_end.timestamp_millis())
        .bind(&record.endpoint)
        .bind(record.status_code as i64)
        .bind(record.request_count as i64)
        .bind(record.avg_latency)
        .bind(record.error_count as i64)
        .execute(executor)
        .await?;

    Ok(())
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        sqlx::query(INSERT_LOG)
            .bind(record.timestamp.timestamp_millis())
            .bind(&record.method)
            .bind(&record.endpoint)
            .bind(record.status_code as i64)
            .bind(record.latency_ms)
            .bind(&record.error_message)
            .bind(&record.user_agent)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<StoredLogRecord>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM api_logs WHERE 1=1", LOG_COLUMNS));

        if let Some(status) = query.status_code {
            qb.push(" AND status_code = ").push_bind(status as i64);
        }
        if let Some(ref endpoint) = query.endpoint {
            qb.push(" AND endpoint = ").push_bind(endpoint.clone());
        }
        if let Some(start) = query.start {
            qb.push(" AND timestamp >= ").push_bind(start.timestamp_millis());
        }
        if let Some(end) = query.end {
            qb.push(" AND timestamp <= ").push_bind(end.timestamp_millis());
        }
        if let Some(min_latency) = query.min_latency {
            qb.push(" AND latency_ms >= ").push_bind(min_latency);
        }

        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(stored_log_from_row).collect()
    }

    async fn count_by_endpoint_where(
        &self,
        threshold: u16,
    ) -> Result<Vec<EndpointErrorCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT endpoint, COUNT(*) AS error_count
             FROM api_logs
             WHERE status_code >= ?
             GROUP BY endpoint
             ORDER BY error_count DESC, endpoint ASC",
        )
        .bind(threshold as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(endpoint, count)| EndpointErrorCount {
                endpoint,
                error_count: count as u64,
            })
            .collect())
    }

    async fn stats_by_endpoint(&self) -> Result<Vec<EndpointLatencyStats>, StoreError> {
        let rows: Vec<(String, f64, f64, i64)> = sqlx::query_as(
            "SELECT endpoint, AVG(latency_ms) AS avg_latency, MAX(latency_ms) AS max_latency,
                    COUNT(*) AS request_count
             FROM api_logs
             GROUP BY endpoint
             ORDER BY avg_latency DESC, endpoint ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(endpoint, avg_latency, max_latency, count)| EndpointLatencyStats {
                endpoint,
                avg_latency,
                max_latency,
                request_count: count as u64,
            })
            .collect())
    }

    async fn insert_summary(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        insert_summary_with(&self.pool, record).await?;
        Ok(())
    }

    async fn logs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        end_inclusive: bool,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let sql = if end_inclusive {
            SELECT_WINDOW_INCLUSIVE
        } else {
            SELECT_WINDOW_EXCLUSIVE
        };
        let rows = sqlx::query(sql)
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .map(log_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    async fn high_water_mark(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mark: Option<i64> = sqlx::query_scalar(
            "SELECT high_water_mark FROM aggregation_checkpoints WHERE job_name = ?",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        mark.map(from_millis).transpose()
    }

    async fn commit_summaries(
        &self,
        summaries: &[SummaryRecord],
        checkpoint: Option<&Checkpoint>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for summary in summaries {
            insert_summary_with(&mut *tx, summary).await?;
        }

        if let Some(checkpoint) = checkpoint {
            sqlx::query(
                "INSERT INTO aggregation_checkpoints (job_name, high_water_mark, updated_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(job_name) DO UPDATE SET
                     high_water_mark = excluded.high_water_mark,
                     updated_at = excluded.updated_at",
            )
            .bind(&checkpoint.job_name)
            .bind(checkpoint.high_water_mark.timestamp_millis())
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query_summaries(&self, limit: usize) -> Result<Vec<StoredSummaryRecord>, StoreError> {
        let rows = sqlx::query(SELECT_SUMMARIES)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(stored_summary_from_row).collect()
    }
}
