/// End-to-end tests for the full middleware stack: rate limiter, interceptor,
/// background log writer and the analytics API.
use api_monitor::{
    aggregation::AggregationJob,
    config::{AggregationMode, Config},
    error::{INTERNAL_ERROR_DETAIL, RATE_LIMITED_DETAIL},
    interceptor::RequestLogger,
    metrics::detached_handle,
    models::{LogRecord, StoredSummaryRecord},
    rate_limit::RateLimiter,
    server::{create_router, AppContext},
    store::{LogStore, MemoryStore},
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
}

fn build(rate_limit: Option<(u32, u32)>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let (logger, _writer) = RequestLogger::new(store.clone(), 64);
    let limiter = rate_limit.map(|(capacity, rpm)| Arc::new(RateLimiter::new(capacity, rpm)));

    let app = create_router(
        &Config::default(),
        AppContext {
            store: store.clone(),
            logger,
            limiter,
            metrics: Arc::new(detached_handle()),
        },
    );

    Harness { app, store }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("user-agent", "pipeline-test/1.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}

async fn wait_for_logs(store: &MemoryStore, expected: usize) -> Vec<LogRecord> {
    for _ in 0..200 {
        let logs = store.logs();
        if logs.len() >= expected {
            return logs;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.logs()
}

#[tokio::test]
async fn test_successful_request_is_logged() {
    let h = build(None);

    let (status, body) = get(&h.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "System Operational");

    let logs = wait_for_logs(&h.store, 1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].method, "GET");
    assert_eq!(logs[0].endpoint, "/");
    assert_eq!(logs[0].status_code, 200);
    assert_eq!(logs[0].user_agent.as_deref(), Some("pipeline-test/1.0"));
    assert!(logs[0].error_message.is_none());
}

#[tokio::test]
async fn test_handler_panic_returns_fixed_500_and_is_logged() {
    let h = build(None);

    let (status, body) = get(&h.app, "/error").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], INTERNAL_ERROR_DETAIL);

    let logs = wait_for_logs(&h.store, 1).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].endpoint, "/error");
    assert_eq!(logs[0].status_code, 500);
    assert_eq!(
        logs[0].error_message.as_deref(),
        Some("Something went wrong!")
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_requests_are_not_logged() {
    let h = build(Some((2, 1)));

    let (first, _) = get(&h.app, "/").await;
    let (second, _) = get(&h.app, "/").await;
    let (third, body) = get(&h.app, "/").await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["detail"], RATE_LIMITED_DETAIL);

    let logs = wait_for_logs(&h.store, 2).await;
    // Give a stray third record time to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.logs().len(), 2);
    assert!(logs.iter().all(|log| log.status_code == 200));
}

#[tokio::test]
async fn test_health_is_not_logged() {
    let h = build(None);

    let (status, _) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.store.logs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bypass_paths_are_never_rate_limited() {
    let h = build(Some((60, 60)));

    for _ in 0..62 {
        let (status, _) = get(&h.app, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = get(&h.app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    // None of those spent the shared budget
    for _ in 0..60 {
        let (status, _) = get(&h.app, "/").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = get(&h.app, "/").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_store_outage_is_invisible_to_clients() {
    let h = build(None);
    h.store.set_available(false);

    let (status, body) = get(&h.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "System Operational");

    h.store.set_available(true);
    let (status, _) = get(&h.app, "/").await;
    assert_eq!(status, StatusCode::OK);

    let logs = wait_for_logs(&h.store, 1).await;
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_logged_requests_flow_into_summaries() {
    let h = build(None);

    get(&h.app, "/").await;
    get(&h.app, "/").await;
    get(&h.app, "/error").await;
    wait_for_logs(&h.store, 3).await;
    // The window end is exclusive at millisecond precision
    tokio::time::sleep(Duration::from_millis(5)).await;

    let job = AggregationJob::new(
        h.store.clone(),
        "pipeline",
        chrono::Duration::minutes(60),
        AggregationMode::Checkpoint,
    );
    let report = job.run().await.unwrap();
    assert_eq!(report.records_scanned, 3);
    assert_eq!(report.summaries_written, 2);

    // A second run right away finds nothing new
    let again = job.run().await.unwrap();
    assert_eq!(again.records_scanned, 0);
    assert_eq!(h.store.summaries().len(), 2);

    let (status, body) = get(&h.app, "/analytics/summaries").await;
    assert_eq!(status, StatusCode::OK);
    let summaries: Vec<StoredSummaryRecord> = serde_json::from_value(body).unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.id > 0));

    let root = summaries.iter().find(|s| s.endpoint == "/").unwrap();
    assert_eq!(root.request_count, 2);
    assert_eq!(root.error_count, 0);

    let error = summaries.iter().find(|s| s.endpoint == "/error").unwrap();
    assert_eq!(error.request_count, 1);
    assert_eq!(error.error_count, 1);
}

#[tokio::test]
async fn test_analytics_reflect_logged_traffic() {
    let h = build(None);

    get(&h.app, "/").await;
    get(&h.app, "/error").await;
    get(&h.app, "/error").await;
    wait_for_logs(&h.store, 3).await;

    let (status, body) = get(&h.app, "/analytics/logs?status_code=500").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    // Store-assigned ids, newest first
    assert!(body[0]["id"].as_i64().unwrap() > body[1]["id"].as_i64().unwrap());

    let (status, body) = get(&h.app, "/analytics/summary/errors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["endpoint"], "/error");
    assert_eq!(body[0]["error_count"], 2);

    let (status, _) = get(&h.app, "/analytics/logs?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Analytics reads themselves go through the interceptor
    let logs = wait_for_logs(&h.store, 6).await;
    assert!(logs.iter().any(|log| log.endpoint == "/analytics/logs"));
    assert!(h.store.query_logs(&Default::default()).await.is_ok());
}
