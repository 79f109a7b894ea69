use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    aggregation::{AggregationJob, AggregationScheduler},
    config::Config,
    handlers::{self, analytics::AnalyticsState},
    interceptor::{monitor_middleware, MonitorState, RequestLogger},
    rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter},
    signals::setup_signal_handlers,
    store::{LogStore, SqliteStore},
};

/// How long shutdown waits for queued log records to reach the store
const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared components the router is built from
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn LogStore>,
    pub logger: RequestLogger,
    /// `None` disables rate limiting
    pub limiter: Option<Arc<RateLimiter>>,
    pub metrics: Arc<PrometheusHandle>,
}

/// Start the API monitor server
///
/// This function:
/// 1. Sets up signal handlers for graceful shutdown
/// 2. Binds to the configured address
/// 3. Serves requests until a shutdown signal arrives
pub async fn start_server(config: Config) -> Result<()> {
    info!("API monitor starting...");

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid server.host '{}'", config.server.host))?,
        config.server.port,
    ));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let metrics = Arc::new(crate::metrics::init_metrics());

    run(config, listener, metrics, async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    signal_handle.abort();
    info!("Server stopped gracefully");

    Ok(())
}

/// Serve on `listener` until `shutdown` completes, then stop background work
pub async fn run<F>(
    config: Config,
    listener: TcpListener,
    metrics: Arc<PrometheusHandle>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(database = %config.database.path, "Opening log store");
    let store: Arc<dyn LogStore> = Arc::new(
        SqliteStore::open(&config.database.path)
            .await
            .context("Failed to open log store")?,
    );

    let (logger, writer) = RequestLogger::new(store.clone(), config.database.logger_buffer);
    info!(
        buffer = config.database.logger_buffer,
        "Request logger initialized"
    );

    let limiter = config
        .rate_limit
        .enabled
        .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));

    let sweep_handle = match &limiter {
        Some(limiter) if limiter.eviction_enabled() => {
            let period = Duration::from_secs(config.rate_limit.sweep_interval_secs);
            Some(tokio::spawn(limiter.clone().sweep_loop(period)))
        }
        _ => None,
    };

    let scheduler = AggregationScheduler::new(config.aggregation.shutdown_policy);
    if config.aggregation.enabled {
        let job = AggregationJob::from_config(store.clone(), &config.aggregation);
        scheduler.schedule(job, config.aggregation.interval()).await;
    } else {
        info!("Aggregation disabled, no job scheduled");
    }

    let app = create_router(
        &config,
        AppContext {
            store,
            logger: logger.clone(),
            limiter,
            metrics,
        },
    );

    info!(
        "Listening on {} (rate limit: {}, aggregation every {}s)",
        listener.local_addr()?,
        if config.rate_limit.enabled { "on" } else { "off" },
        config.aggregation.interval_secs
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    scheduler.shutdown().await;
    if let Some(handle) = sweep_handle {
        handle.abort();
    }

    // The writer stops once the last logger clone is gone and the queue is empty
    drop(logger);
    match tokio::time::timeout(LOGGER_DRAIN_TIMEOUT, writer).await {
        Ok(_) => info!("Request logger drained"),
        Err(_) => tracing::warn!("Timed out draining request logger, pending records dropped"),
    }

    Ok(())
}

/// Create the Axum router with all routes and middleware
///
/// Layer order, outermost first: tracing, rate limiter, request interceptor.
/// Rate-limited requests therefore never produce a log record.
pub fn create_router(config: &Config, ctx: AppContext) -> Router {
    let analytics_routes = Router::new()
        .route("/analytics/logs", get(handlers::analytics::get_logs))
        .route(
            "/analytics/summary/errors",
            get(handlers::analytics::get_error_summary),
        )
        .route(
            "/analytics/summary/latency",
            get(handlers::analytics::get_latency_summary),
        )
        .route("/analytics/summaries", get(handlers::analytics::get_summaries))
        .with_state(AnalyticsState {
            store: ctx.store.clone(),
        });

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(ctx.metrics.clone());

    let monitor_state = Arc::new(MonitorState::new(ctx.logger.clone(), config));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/", get(handlers::demo::root))
        .route("/users", get(handlers::demo::list_users))
        .route("/error", get(handlers::demo::trigger_error))
        .route("/slow", get(handlers::demo::slow))
        .merge(analytics_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn_with_state(monitor_state, monitor_middleware));

    let app = match ctx.limiter {
        Some(limiter) => {
            let state = Arc::new(RateLimitState::new(limiter, config.bypass_paths.clone()));
            app.layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        }
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
}
