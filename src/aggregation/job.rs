use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{AggregationConfig, AggregationMode};
use crate::error::StoreError;
use crate::models::{Checkpoint, LogRecord, SummaryRecord};
use crate::store::{to_store_precision, LogStore};

/// Outcome of one aggregation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub records_scanned: usize,
    pub summaries_written: usize,
}

/// Compresses raw log records into per-(endpoint, status) summaries
pub struct AggregationJob {
    store: Arc<dyn LogStore>,
    name: String,
    window: Duration,
    mode: AggregationMode,
    settle_lag: Duration,
}

impl AggregationJob {
    pub fn new(
        store: Arc<dyn LogStore>,
        name: impl Into<String>,
        window: Duration,
        mode: AggregationMode,
    ) -> Self {
        Self {
            store,
            name: name.into(),
            window,
            mode,
            settle_lag: Duration::zero(),
        }
    }

    pub fn from_config(store: Arc<dyn LogStore>, config: &AggregationConfig) -> Self {
        Self::new(store, config.job_name.clone(), config.window(), config.mode)
            .with_settle_lag(config.settle_lag())
    }

    /// Hold back the checkpoint window end by `lag`
    ///
    /// Records are stamped when a request starts but persisted after its
    /// response is released. The lag must exceed the longest request plus the
    /// logger queue delay, or late records fall behind the mark.
    pub fn with_settle_lag(mut self, lag: Duration) -> Self {
        self.settle_lag = lag;
        self
    }

    /// Job identity; also the checkpoint key
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    pub async fn run(&self) -> Result<AggregationReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    /// Aggregate the window ending at `now`
    ///
    /// Checkpoint mode reads `[high_water_mark, now - settle_lag)` and commits
    /// the summaries together with the new mark; a failed run leaves both
    /// untouched. Trailing mode reads `[now - window, now]` and keeps no state.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<AggregationReport, StoreError> {
        let now = to_store_precision(now);

        match self.mode {
            AggregationMode::Checkpoint => self.run_checkpointed(now - self.settle_lag).await,
            AggregationMode::Trailing => self.run_trailing(now).await,
        }
    }

    async fn run_checkpointed(
        &self,
        window_end: DateTime<Utc>,
    ) -> Result<AggregationReport, StoreError> {
        let window_start = match self.store.high_water_mark(&self.name).await? {
            Some(mark) => mark,
            None => window_end - self.window,
        };

        if window_start >= window_end {
            tracing::debug!(
                job = %self.name,
                high_water_mark = %window_start,
                "Aggregation window is empty, nothing to do"
            );
            return Ok(AggregationReport {
                window_start,
                window_end: window_start,
                records_scanned: 0,
                summaries_written: 0,
            });
        }

        let records = self
            .store
            .logs_between(window_start, window_end, false)
            .await?;
        let summaries = summarize(&records, window_start, window_end);

        if records.is_empty() {
            tracing::info!(job = %self.name, "No logs found to aggregate");
        }

        // An empty window still moves the mark forward
        let checkpoint = Checkpoint {
            job_name: self.name.clone(),
            high_water_mark: window_end,
        };
        self.store
            .commit_summaries(&summaries, Some(&checkpoint))
            .await?;

        Ok(AggregationReport {
            window_start,
            window_end,
            records_scanned: records.len(),
            summaries_written: summaries.len(),
        })
    }

    async fn run_trailing(&self, window_end: DateTime<Utc>) -> Result<AggregationReport, StoreError> {
        let window_start = window_end - self.window;
        let records = self.store.logs_between(window_start, window_end, true).await?;

        if records.is_empty() {
            tracing::info!(job = %self.name, "No logs found to aggregate");
            return Ok(AggregationReport {
                window_start,
                window_end,
                records_scanned: 0,
                summaries_written: 0,
            });
        }

        let summaries = summarize(&records, window_start, window_end);
        self.store.commit_summaries(&summaries, None).await?;

        Ok(AggregationReport {
            window_start,
            window_end,
            records_scanned: records.len(),
            summaries_written: summaries.len(),
        })
    }
}

/// Group records by (endpoint, status_code), ordered by that key
pub fn summarize(
    records: &[LogRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<SummaryRecord> {
    // (count, latency sum, errors)
    let mut groups: BTreeMap<(&str, u16), (u64, f64, u64)> = BTreeMap::new();

    for record in records {
        let group = groups
            .entry((record.endpoint.as_str(), record.status_code))
            .or_insert((0, 0.0, 0));
        group.0 += 1;
        group.1 += record.latency_ms;
        if record.is_error() {
            group.2 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((endpoint, status_code), (count, latency_sum, errors))| SummaryRecord {
            window_start,
            window_end,
            endpoint: endpoint.to_string(),
            status_code,
            request_count: count,
            avg_latency: latency_sum / count as f64,
            error_count: errors,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(now: DateTime<Utc>, secs_ago: i64) -> DateTime<Utc> {
        to_store_precision(now) - Duration::seconds(secs_ago)
    }

    async fn seed(store: &MemoryStore, records: &[(&str, u16, f64, DateTime<Utc>)]) {
        for (endpoint, status, latency, ts) in records {
            store
                .insert_log(&LogRecord::new(*ts, "GET", *endpoint, *status, *latency))
                .await
                .unwrap();
        }
    }

    fn job(store: Arc<MemoryStore>, mode: AggregationMode) -> AggregationJob {
        AggregationJob::new(store, "hourly_aggregation", Duration::minutes(60), mode)
    }

    #[test]
    fn test_summarize_groups_by_endpoint_and_status() {
        let now = Utc::now();
        let records = vec![
            LogRecord::new(now, "GET", "/users", 200, 100.0),
            LogRecord::new(now, "GET", "/users", 200, 300.0),
            LogRecord::new(now, "GET", "/users", 500, 10.0),
            LogRecord::new(now, "GET", "/error", 500, 4.0),
        ];

        let summaries = summarize(&records, now - Duration::hours(1), now);
        assert_eq!(summaries.len(), 3);

        assert_eq!(summaries[0].endpoint, "/error");
        assert_eq!(summaries[0].error_count, 1);

        let ok = &summaries[1];
        assert_eq!((ok.endpoint.as_str(), ok.status_code), ("/users", 200));
        assert_eq!(ok.request_count, 2);
        assert_eq!(ok.avg_latency, 200.0);
        assert_eq!(ok.error_count, 0);

        let failed = &summaries[2];
        assert_eq!(failed.status_code, 500);
        assert_eq!(failed.error_count, failed.request_count);
    }

    #[tokio::test]
    async fn test_first_run_covers_one_window() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        seed(
            &store,
            &[
                ("/users", 200, 100.0, at(now, 60)),
                ("/users", 200, 300.0, at(now, 120)),
                ("/users", 200, 999.0, at(now, 2 * 3600)),
            ],
        )
        .await;

        let report = job(store.clone(), AggregationMode::Checkpoint)
            .run_at(now)
            .await
            .unwrap();

        assert_eq!(report.records_scanned, 2);
        assert_eq!(report.summaries_written, 1);
        assert_eq!(report.window_end - report.window_start, Duration::minutes(60));

        let summaries = store.summaries();
        assert_eq!(summaries[0].request_count, 2);
        assert_eq!(summaries[0].avg_latency, 200.0);
        assert_eq!(summaries[0].error_count, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_prevents_double_counting() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        seed(&store, &[("/users", 200, 100.0, at(now, 60))]).await;

        let job = job(store.clone(), AggregationMode::Checkpoint);
        job.run_at(now).await.unwrap();
        let second = job.run_at(now + Duration::minutes(10)).await.unwrap();

        assert_eq!(second.records_scanned, 0);
        assert_eq!(second.window_start, to_store_precision(now));
        let total: u64 = store.summaries().iter().map(|s| s.request_count).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_trailing_mode_double_counts_overlap() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        seed(&store, &[("/users", 200, 100.0, at(now, 60))]).await;

        let job = job(store.clone(), AggregationMode::Trailing);
        job.run_at(now).await.unwrap();
        job.run_at(now + Duration::minutes(10)).await.unwrap();

        let total: u64 = store.summaries().iter().map(|s| s.request_count).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_covers_gap_after_missed_ticks() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let job = job(store.clone(), AggregationMode::Checkpoint);
        job.run_at(now).await.unwrap();

        // Three hours without a run, then a record from the middle of the gap
        let later = now + Duration::hours(3);
        seed(&store, &[("/users", 200, 50.0, at(later, 2 * 3600))]).await;

        let report = job.run_at(later).await.unwrap();
        assert_eq!(report.window_start, to_store_precision(now));
        assert_eq!(report.records_scanned, 1);
    }

    #[tokio::test]
    async fn test_empty_window_writes_nothing_but_advances_mark() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let report = job(store.clone(), AggregationMode::Checkpoint)
            .run_at(now)
            .await
            .unwrap();

        assert_eq!(report.summaries_written, 0);
        assert!(store.summaries().is_empty());
        assert_eq!(
            store.high_water_mark("hourly_aggregation").await.unwrap(),
            Some(to_store_precision(now))
        );
    }

    #[tokio::test]
    async fn test_record_persisted_after_tick_is_counted_next_run() {
        let store = Arc::new(MemoryStore::new());
        let tick = to_store_precision(Utc::now());
        let job = job(store.clone(), AggregationMode::Checkpoint)
            .with_settle_lag(Duration::seconds(30));

        let first = job.run_at(tick).await.unwrap();
        assert_eq!(first.window_end, tick - Duration::seconds(30));
        assert_eq!(first.records_scanned, 0);

        // Request started a second before the tick, its record landed after it
        seed(&store, &[("/slow", 200, 1500.0, tick - Duration::seconds(1))]).await;

        let next = job.run_at(tick + Duration::hours(1)).await.unwrap();
        assert_eq!(next.window_start, first.window_end);
        assert_eq!(next.records_scanned, 1);

        let again = job.run_at(tick + Duration::hours(2)).await.unwrap();
        assert_eq!(again.records_scanned, 0);
        let total: u64 = store.summaries().iter().map(|s| s.request_count).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_from_config_applies_settle_lag() {
        let store = Arc::new(MemoryStore::new());
        let config = AggregationConfig::default();
        let now = to_store_precision(Utc::now());

        let report = AggregationJob::from_config(store.clone(), &config)
            .run_at(now)
            .await
            .unwrap();

        assert_eq!(report.window_end, now - config.settle_lag());
        assert_eq!(
            store.high_water_mark(&config.job_name).await.unwrap(),
            Some(now - config.settle_lag())
        );
    }

    #[tokio::test]
    async fn test_failed_run_keeps_mark() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let job = job(store.clone(), AggregationMode::Checkpoint);
        job.run_at(now).await.unwrap();

        store.set_available(false);
        assert!(job.run_at(now + Duration::hours(1)).await.is_err());
        store.set_available(true);

        assert_eq!(
            store.high_water_mark("hourly_aggregation").await.unwrap(),
            Some(to_store_precision(now))
        );
    }
}
