use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::DEFAULT_ERROR_TRUNCATE_LENGTH;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Path prefixes exempt from both logging and rate limiting
    #[serde(default)]
    pub bypass_paths: BypassPaths,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// Path prefixes matched against the raw request path
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct BypassPaths(Vec<String>);

impl BypassPaths {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(prefixes.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn push(&mut self, prefix: impl Into<String>) {
        self.0.push(prefix.into());
    }
}

impl Default for BypassPaths {
    fn default() -> Self {
        Self::new(["/health", "/metrics", "/static"])
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Capacity of the request logger channel
    #[serde(default = "default_logger_buffer")]
    pub logger_buffer: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            logger_buffer: default_logger_buffer(),
        }
    }
}

/// Request interceptor settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_error_truncate_length")]
    pub error_truncate_length: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_truncate_length: default_error_truncate_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket capacity (max burst)
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Refill rate in requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,

    /// Evict buckets idle for longer than this (0 = never)
    #[serde(default)]
    pub idle_ttl_secs: u64,

    /// Upper bound on tracked clients (0 = unbounded)
    #[serde(default)]
    pub max_clients: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            rpm: default_rpm(),
            idle_ttl_secs: 0,
            max_clients: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitConfig {
    pub fn eviction_enabled(&self) -> bool {
        self.idle_ttl_secs > 0 || self.max_clients > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Aggregate from the persisted high-water mark to now
    Checkpoint,
    /// Aggregate [now - window, now] on every run, without a checkpoint
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Let an in-flight run finish
    Drain,
    /// Interrupt an in-flight run
    Abort,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_aggregation_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    #[serde(default = "default_aggregation_mode")]
    pub mode: AggregationMode,

    #[serde(default = "default_shutdown_policy")]
    pub shutdown_policy: ShutdownPolicy,

    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Checkpoint mode only aggregates up to `now - settle_secs`, leaving
    /// records still in flight or queued for the next run
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_aggregation_interval(),
            window_minutes: default_window_minutes(),
            mode: default_aggregation_mode(),
            shutdown_policy: default_shutdown_policy(),
            job_name: default_job_name(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl AggregationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes as i64)
    }

    pub fn settle_lag(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settle_secs as i64)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_path() -> String {
    "./data/api_monitor.db".to_string()
}

fn default_logger_buffer() -> usize {
    10_000
}

fn default_error_truncate_length() -> usize {
    DEFAULT_ERROR_TRUNCATE_LENGTH
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> u32 {
    60
}

fn default_rpm() -> u32 {
    60
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_aggregation_interval() -> u64 {
    3600
}

fn default_window_minutes() -> u64 {
    60
}

fn default_aggregation_mode() -> AggregationMode {
    AggregationMode::Checkpoint
}

fn default_shutdown_policy() -> ShutdownPolicy {
    ShutdownPolicy::Drain
}

fn default_job_name() -> String {
    "hourly_aggregation".to_string()
}

fn default_settle_secs() -> u64 {
    60
}

/// Load configuration from `path` (optional) overlaid with `API_MONITOR__*` variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("API_MONITOR").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.rate_limit.capacity == 0 {
        anyhow::bail!("rate_limit.capacity must be at least 1");
    }

    if cfg.rate_limit.rpm == 0 {
        anyhow::bail!("rate_limit.rpm must be at least 1");
    }

    if cfg.rate_limit.eviction_enabled() && cfg.rate_limit.sweep_interval_secs == 0 {
        anyhow::bail!("rate_limit.sweep_interval_secs must be positive when eviction is enabled");
    }

    if cfg.aggregation.interval_secs == 0 {
        anyhow::bail!("aggregation.interval_secs must be positive");
    }

    if cfg.aggregation.window_minutes == 0 {
        anyhow::bail!("aggregation.window_minutes must be positive");
    }

    if cfg.aggregation.job_name.is_empty() {
        anyhow::bail!("aggregation.job_name cannot be empty");
    }

    if cfg.monitor.error_truncate_length == 0 {
        anyhow::bail!("monitor.error_truncate_length must be positive");
    }

    for prefix in cfg.bypass_paths.iter() {
        if !prefix.starts_with('/') {
            anyhow::bail!("Bypass path '{}' must start with '/'", prefix);
        }
    }

    match cfg.server.log_format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Invalid log_format '{}', expected 'pretty' or 'json'", other),
    }

    Ok(())
}
