//! Record types shared by the interceptor, the store and the aggregation job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker appended to error messages cut at the truncation limit
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Default maximum length (in characters) of a persisted error message
pub const DEFAULT_ERROR_TRUNCATE_LENGTH: usize = 1000;

/// Maximum length (in characters) of a persisted user agent
pub const USER_AGENT_MAX_LENGTH: usize = 500;

/// One log record per completed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Captured when the request entered the interceptor
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Raw request path, never the route template
    pub endpoint: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub error_message: Option<String>,
    pub user_agent: Option<String>,
}

impl LogRecord {
    /// Build a record for a request that completed without a fault
    pub fn new(
        timestamp: DateTime<Utc>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status_code: u16,
        latency_ms: f64,
    ) -> Self {
        Self {
            timestamp,
            method: method.into(),
            endpoint: endpoint.into(),
            status_code,
            latency_ms: latency_ms.max(0.0),
            error_message: None,
            user_agent: None,
        }
    }

    /// Attach a fault description, truncated to `max_len` characters
    pub fn with_error(mut self, message: &str, max_len: usize) -> Self {
        self.error_message = Some(truncate_error(message, max_len));
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(|ua| truncate_chars(ua, USER_AGENT_MAX_LENGTH).to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// Truncate an error message to `max_len` characters, appending [`TRUNCATION_MARKER`]
/// when anything was cut.
pub fn truncate_error(message: &str, max_len: usize) -> String {
    let truncated = truncate_chars(message, max_len);
    if truncated.len() < message.len() {
        format!("{}{}", truncated, TRUNCATION_MARKER)
    } else {
        message.to_string()
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Statistical summary of one (endpoint, status_code) group within a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub endpoint: String,
    pub status_code: u16,
    pub request_count: u64,
    pub avg_latency: f64,
    /// Always 0 or `request_count`, since status is part of the group key
    pub error_count: u64,
}

/// Persisted aggregation boundary for one job identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_name: String,
    pub high_water_mark: DateTime<Utc>,
}

/// Filter for raw log queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQuery {
    pub status_code: Option<u16>,
    pub endpoint: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub min_latency: Option<f64>,
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            status_code: None,
            endpoint: None,
            start: None,
            end: None,
            min_latency: None,
            limit: 100,
        }
    }
}

impl LogQuery {
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(status) = self.status_code {
            if record.status_code != status {
                return false;
            }
        }
        if let Some(ref endpoint) = self.endpoint {
            if &record.endpoint != endpoint {
                return false;
            }
        }
        if let Some(start) = self.start {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if record.timestamp > end {
                return false;
            }
        }
        if let Some(min_latency) = self.min_latency {
            if record.latency_ms < min_latency {
                return false;
            }
        }
        true
    }
}

/// A persisted record together with its store-assigned id
///
/// Serializes as the record's own fields plus `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    #[serde(flatten)]
    pub record: T,
}

impl<T> Stored<T> {
    pub fn new(id: i64, record: T) -> Self {
        Self { id, record }
    }

    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T> std::ops::Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

pub type StoredLogRecord = Stored<LogRecord>;
pub type StoredSummaryRecord = Stored<SummaryRecord>;

/// Error count per endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointErrorCount {
    pub endpoint: String,
    pub error_count: u64,
}

/// Latency statistics per endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointLatencyStats {
    pub endpoint: String,
    pub avg_latency: f64,
    pub max_latency: f64,
    pub request_count: u64,
}
