//! Analytics HTTP API handlers
//!
//! Read-only views over the log store:
//! - raw logs with filtering
//! - error counts and latency statistics per endpoint
//! - stored aggregation summaries

use crate::error::AppError;
use crate::models::{
    EndpointErrorCount, EndpointLatencyStats, LogQuery, StoredLogRecord, StoredSummaryRecord,
};
use crate::store::LogStore;
use axum::extract::{Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Status codes at or above this count as errors
const ERROR_STATUS_THRESHOLD: u16 = 400;

/// Shared state for the analytics API
#[derive(Clone)]
pub struct AnalyticsState {
    pub store: Arc<dyn LogStore>,
}

/// Query parameters for the logs API
#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub status_code: Option<u16>,
    pub endpoint: Option<String>,
    /// RFC 3339, inclusive
    pub start_time: Option<DateTime<Utc>>,
    /// RFC 3339, inclusive
    pub end_time: Option<DateTime<Utc>>,
    pub min_latency: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct SummariesParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

fn check_limit(limit: usize) -> Result<(), AppError> {
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }
    Ok(())
}

/// GET /analytics/logs - Raw logs with their ids, newest first
///
/// Example: GET /analytics/logs?status_code=500&min_latency=100&limit=10
pub async fn get_logs(
    State(state): State<AnalyticsState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<StoredLogRecord>>, AppError> {
    check_limit(params.limit)?;

    let query = LogQuery {
        status_code: params.status_code,
        endpoint: params.endpoint,
        start: params.start_time,
        end: params.end_time,
        min_latency: params.min_latency,
        limit: params.limit,
    };

    Ok(Json(state.store.query_logs(&query).await?))
}

/// GET /analytics/summary/errors - Top failing endpoints
pub async fn get_error_summary(
    State(state): State<AnalyticsState>,
) -> Result<Json<Vec<EndpointErrorCount>>, AppError> {
    let rows = state
        .store
        .count_by_endpoint_where(ERROR_STATUS_THRESHOLD)
        .await?;
    Ok(Json(rows))
}

/// GET /analytics/summary/latency - Latency statistics per endpoint
pub async fn get_latency_summary(
    State(state): State<AnalyticsState>,
) -> Result<Json<Vec<EndpointLatencyStats>>, AppError> {
    let rows = state
        .store
        .stats_by_endpoint()
        .await?
        .into_iter()
        .map(|row| EndpointLatencyStats {
            avg_latency: round2(row.avg_latency),
            max_latency: round2(row.max_latency),
            ..row
        })
        .collect();

    Ok(Json(rows))
}

/// GET /analytics/summaries - Stored aggregation summaries, newest window first
pub async fn get_summaries(
    State(state): State<AnalyticsState>,
    Query(params): Query<SummariesParams>,
) -> Result<Json<Vec<StoredSummaryRecord>>, AppError> {
    check_limit(params.limit)?;
    Ok(Json(state.store.query_summaries(params.limit).await?))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
