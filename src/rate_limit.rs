//! Per-client token-bucket rate limiting
//!
//! Each client key owns one [`RateBucket`] in a sharded [`DashMap`]. A check
//! refills the bucket by the elapsed time and spends one token, all while the
//! entry guard is held, so concurrent requests from one client never race and
//! unrelated clients only share a shard lock.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{BypassPaths, RateLimitConfig};
use crate::error::AppError;

/// Client key used when the peer address is unknown
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Token bucket state for one client
#[derive(Debug, Clone, Copy)]
pub struct RateBucket {
    /// Always within `0.0..=capacity`
    pub tokens: f64,
    pub last_refill: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<String, RateBucket>,
    capacity: f64,
    /// Refill rate in tokens per minute
    rpm: f64,
    idle_ttl: Option<Duration>,
    max_clients: Option<usize>,
}

impl RateLimiter {
    /// Limiter with capacity `capacity` refilling at `rpm / 60` tokens per second
    pub fn new(capacity: u32, rpm: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: capacity as f64,
            rpm: rpm as f64,
            idle_ttl: None,
            max_clients: None,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut limiter = Self::new(config.capacity, config.rpm);
        if config.idle_ttl_secs > 0 {
            limiter = limiter.with_idle_ttl(Duration::from_secs(config.idle_ttl_secs));
        }
        if config.max_clients > 0 {
            limiter = limiter.with_max_clients(config.max_clients);
        }
        limiter
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = Some(max_clients);
        self
    }

    /// Admission check for `key` at the current instant
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Admission check for `key` at `now`
    ///
    /// A new client starts with a full bucket. Otherwise the bucket gains
    /// `elapsed * rpm / 60` tokens (capped at capacity) before one is spent.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateBucket {
                tokens: self.capacity,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * self.rpm / 60.0;
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current bucket for `key`, if tracked
    pub fn bucket(&self, key: &str) -> Option<RateBucket> {
        self.buckets.get(key).map(|b| *b)
    }

    pub fn client_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn eviction_enabled(&self) -> bool {
        self.idle_ttl.is_some() || self.max_clients.is_some()
    }

    /// Drop idle buckets, then the least recently refilled ones above the
    /// client cap. Returns the number of buckets removed.
    pub fn evict_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();

        if let Some(ttl) = self.idle_ttl {
            self.buckets
                .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < ttl);
        }

        if let Some(max) = self.max_clients {
            let len = self.buckets.len();
            if len > max {
                let mut by_age: Vec<(String, Instant)> = self
                    .buckets
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().last_refill))
                    .collect();
                by_age.sort_by_key(|(_, last_refill)| *last_refill);

                for (key, _) in by_age.into_iter().take(len - max) {
                    self.buckets.remove(&key);
                }
            }
        }

        before.saturating_sub(self.buckets.len())
    }

    /// Periodic eviction (background task)
    pub async fn sweep_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let evicted = self.evict_at(Instant::now());
            let clients = self.client_count();
            crate::metrics::update_client_count(clients);

            tracing::debug!(
                evicted = evicted,
                active_clients = clients,
                "Rate limiter sweep completed"
            );
        }
    }
}

/// State for [`rate_limit_middleware`]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    /// Same set the request interceptor skips
    pub bypass_paths: BypassPaths,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, bypass_paths: BypassPaths) -> Self {
        Self {
            limiter,
            bypass_paths,
        }
    }
}

/// Client identity for rate limiting: the peer IP address
pub fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Rate limiting middleware
///
/// Rejects over-budget clients with the fixed 429 response before any inner
/// layer (including the request interceptor) sees the request.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.bypass_paths.matches(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let key = client_key(&req);
    if !state.limiter.check(&key) {
        crate::metrics::record_rate_limited();
        tracing::debug!(
            client = %key,
            path = %req.uri().path(),
            "Rate limit exceeded"
        );
        return Err(AppError::RateLimited);
    }

    Ok(next.run(req).await)
}
