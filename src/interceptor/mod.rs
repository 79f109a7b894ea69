//! Request interceptor
//!
//! Wraps every monitored request:
//! - captures the start instant and wall-clock timestamp
//! - contains handler panics, replacing them with the fixed 500 response
//! - stops the clock before any persistence work
//! - hands the [`LogRecord`] to the [`RequestLogger`] from a deferred action
//!   that runs only after the response body has been released

pub mod deferred;
pub mod logger;

pub use deferred::{panic_message, DeferredBody, DeferredTasks};
pub use logger::{LogDropped, RequestLogger};

use axum::{
    extract::{Request, State},
    http::header::USER_AGENT,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::{BypassPaths, Config};
use crate::error::internal_error_response;
use crate::models::LogRecord;

/// Error message recorded when the client went away before a response existed
pub const CANCELLED_MESSAGE: &str = "request cancelled before a response was produced";

/// State for the interceptor middleware
pub struct MonitorState {
    pub logger: RequestLogger,
    pub bypass_paths: BypassPaths,
    pub error_truncate_length: usize,
}

impl MonitorState {
    pub fn new(logger: RequestLogger, config: &Config) -> Self {
        Self {
            logger,
            bypass_paths: config.bypass_paths.clone(),
            error_truncate_length: config.monitor.error_truncate_length,
        }
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.matches(path)
    }
}

/// Request-scoped data captured before the handler runs
struct RequestMeta {
    started_at: DateTime<Utc>,
    method: String,
    endpoint: String,
    user_agent: Option<String>,
}

impl RequestMeta {
    fn into_record(self, status: u16, elapsed: std::time::Duration) -> LogRecord {
        crate::metrics::record_request(&self.method, &self.endpoint, status, elapsed);

        LogRecord::new(
            self.started_at,
            self.method,
            self.endpoint,
            status,
            elapsed.as_secs_f64() * 1000.0,
        )
        .with_user_agent(self.user_agent.as_deref())
    }
}

/// Emits a failure record if the interceptor future is dropped mid-handler
struct InFlightGuard {
    meta: Option<RequestMeta>,
    start: Instant,
    logger: RequestLogger,
    error_truncate_length: usize,
}

impl InFlightGuard {
    fn disarm(mut self) -> Option<RequestMeta> {
        self.meta.take()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(meta) = self.meta.take() {
            let record = meta
                .into_record(500, self.start.elapsed())
                .with_error(CANCELLED_MESSAGE, self.error_truncate_length);

            tracing::warn!(endpoint = %record.endpoint, "Request cancelled before completion");
            if let Err(e) = self.logger.try_log(record) {
                tracing::warn!(error = %e, "Dropped log record for cancelled request");
            }
        }
    }
}

/// Request interceptor middleware
pub async fn monitor_middleware(
    State(state): State<Arc<MonitorState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if state.is_bypassed(req.uri().path()) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let meta = RequestMeta {
        started_at: Utc::now(),
        method: req.method().to_string(),
        endpoint: req.uri().path().to_string(),
        user_agent: req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    // Handlers may register their own post-response actions through this list
    let tasks = DeferredTasks::new();
    req.extensions_mut().insert(tasks.clone());

    let guard = InFlightGuard {
        meta: Some(meta),
        start,
        logger: state.logger.clone(),
        error_truncate_length: state.error_truncate_length,
    };

    let outcome = AssertUnwindSafe(next.run(req)).catch_unwind().await;
    let elapsed = start.elapsed();

    let (mut response, fault) = match outcome {
        Ok(response) => (response, None),
        Err(panic) => (internal_error_response(), Some(panic_message(panic.as_ref()))),
    };

    let Some(meta) = guard.disarm() else {
        return response;
    };

    let mut record = meta.into_record(response.status().as_u16(), elapsed);
    if let Some(fault) = fault {
        tracing::error!(
            method = %record.method,
            endpoint = %record.endpoint,
            error = %fault,
            "Handler panicked"
        );
        record = record.with_error(&fault, state.error_truncate_length);
    }

    // Actions attached to the response by inner layers were registered before the log write
    if let Some(attached) = response.extensions_mut().remove::<DeferredTasks>() {
        tasks.append(&attached);
    }

    let logger = state.logger.clone();
    tasks.push("log_write", move || async move {
        logger.try_log(record).map_err(anyhow::Error::from)
    });

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, DeferredBody::wrap(body, tasks))
}
