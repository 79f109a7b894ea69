//! In-process store
//!
//! Mirrors the SQLite store's semantics (ordering, bounds, atomic checkpoint
//! commits) without I/O. `set_available(false)` simulates an outage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{to_store_precision, LogStore};
use crate::error::StoreError;
use crate::models::{
    Checkpoint, EndpointErrorCount, EndpointLatencyStats, LogQuery, LogRecord, Stored,
    StoredLogRecord, StoredSummaryRecord, SummaryRecord,
};

#[derive(Default)]
struct Tables {
    logs: Vec<LogRecord>,
    summaries: Vec<SummaryRecord>,
    checkpoints: HashMap<String, DateTime<Utc>>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Toggle a simulated outage; while unavailable every operation fails
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of every stored log, in insertion order
    pub fn logs(&self) -> Vec<LogRecord> {
        self.lock().logs.clone()
    }

    /// Snapshot of every stored summary, in insertion order
    pub fn summaries(&self) -> Vec<SummaryRecord> {
        self.lock().summaries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.check_available()?;

        let mut record = record.clone();
        record.timestamp = to_store_precision(record.timestamp);
        self.lock().logs.push(record);
        Ok(())
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<StoredLogRecord>, StoreError> {
        self.check_available()?;

        let tables = self.lock();
        // Ids are 1-based insert positions; newest first, later insert wins ties
        let mut matched: Vec<StoredLogRecord> = tables
            .logs
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, r)| query.matches(r))
            .map(|(i, r)| Stored::new(i as i64 + 1, r.clone()))
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit);

        Ok(matched)
    }

    async fn count_by_endpoint_where(
        &self,
        threshold: u16,
    ) -> Result<Vec<EndpointErrorCount>, StoreError> {
        self.check_available()?;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in self.lock().logs.iter().filter(|r| r.status_code >= threshold) {
            *counts.entry(record.endpoint.clone()).or_default() += 1;
        }

        let mut rows: Vec<EndpointErrorCount> = counts
            .into_iter()
            .map(|(endpoint, error_count)| EndpointErrorCount { endpoint, error_count })
            .collect();
        // Stable sort keeps endpoint order for ties
        rows.sort_by(|a, b| b.error_count.cmp(&a.error_count));

        Ok(rows)
    }

    async fn stats_by_endpoint(&self) -> Result<Vec<EndpointLatencyStats>, StoreError> {
        self.check_available()?;

        let mut acc: BTreeMap<String, (f64, f64, u64)> = BTreeMap::new();
        for record in self.lock().logs.iter() {
            let entry = acc.entry(record.endpoint.clone()).or_insert((0.0, f64::MIN, 0));
            entry.0 += record.latency_ms;
            entry.1 = entry.1.max(record.latency_ms);
            entry.2 += 1;
        }

        let mut rows: Vec<EndpointLatencyStats> = acc
            .into_iter()
            .map(|(endpoint, (sum, max, count))| EndpointLatencyStats {
                endpoint,
                avg_latency: sum / count as f64,
                max_latency: max,
                request_count: count,
            })
            .collect();
        rows.sort_by(|a, b| b.avg_latency.total_cmp(&a.avg_latency));

        Ok(rows)
    }

    async fn insert_summary(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().summaries.push(record.clone());
        Ok(())
    }

    async fn logs_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        end_inclusive: bool,
    ) -> Result<Vec<LogRecord>, StoreError> {
        self.check_available()?;

        let mut records: Vec<LogRecord> = self
            .lock()
            .logs
            .iter()
            .filter(|r| {
                r.timestamp >= start
                    && if end_inclusive {
                        r.timestamp <= end
                    } else {
                        r.timestamp < end
                    }
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        Ok(records)
    }

    async fn high_water_mark(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check_available()?;
        Ok(self.lock().checkpoints.get(job_name).copied())
    }

    async fn commit_summaries(
        &self,
        summaries: &[SummaryRecord],
        checkpoint: Option<&Checkpoint>,
    ) -> Result<(), StoreError> {
        self.check_available()?;

        let mut tables = self.lock();
        tables.summaries.extend_from_slice(summaries);
        if let Some(checkpoint) = checkpoint {
            tables
                .checkpoints
                .insert(checkpoint.job_name.clone(), checkpoint.high_water_mark);
        }
        Ok(())
    }

    async fn query_summaries(&self, limit: usize) -> Result<Vec<StoredSummaryRecord>, StoreError> {
        self.check_available()?;

        let mut summaries: Vec<StoredSummaryRecord> = self
            .lock()
            .summaries
            .iter()
            .enumerate()
            .map(|(i, s)| Stored::new(i as i64 + 1, s.clone()))
            .collect();
        summaries.sort_by(|a, b| {
            b.window_end
                .cmp(&a.window_end)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
                .then_with(|| a.status_code.cmp(&b.status_code))
        });
        summaries.truncate(limit);

        Ok(summaries)
    }
}
