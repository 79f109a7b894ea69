//! Logs query command
//!
//! Query and display stored request logs from the SQLite database.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use colored::Colorize;
use std::path::Path;

use api_monitor::config;
use api_monitor::models::{LogQuery, StoredLogRecord};
use api_monitor::store::{LogStore, SqliteStore};

/// Query and display request logs
#[derive(Debug, Clone, Parser)]
pub struct LogsArgs {
    /// Filter by status code
    #[arg(short, long)]
    pub status_code: Option<u16>,

    /// Filter by endpoint path
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Minimum latency in milliseconds
    #[arg(long)]
    pub min_latency: Option<f64>,

    /// Show logs since N seconds ago (e.g., 3600 for last hour)
    #[arg(long)]
    pub since: Option<i64>,

    /// Maximum number of results
    #[arg(long, default_value = "100")]
    pub limit: usize,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    pub format: String,
}

/// Execute the logs command
pub async fn execute(config_path: &Path, args: LogsArgs) -> Result<()> {
    let cfg = config::load_config(config_path)?;

    if !Path::new(&cfg.database.path).exists() {
        eprintln!(
            "{}",
            format!("Database not found at {}", cfg.database.path).red()
        );
        return Ok(());
    }

    let store = SqliteStore::open(&cfg.database.path)
        .await
        .context("Failed to open log store")?;

    let query = LogQuery {
        status_code: args.status_code,
        endpoint: args.endpoint.clone(),
        start: args.since.map(|s| Utc::now() - Duration::seconds(s)),
        end: None,
        min_latency: args.min_latency,
        limit: args.limit,
    };

    let logs = store.query_logs(&query).await?;

    if logs.is_empty() {
        println!("{}", "No logs found matching the criteria".yellow());
        return Ok(());
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&logs)?),
        _ => display_logs_text(&logs),
    }

    Ok(())
}

/// Display logs in human-friendly text format
fn display_logs_text(logs: &[StoredLogRecord]) {
    println!("{}", format!("Found {} log entries", logs.len()).bold());
    println!();

    for log in logs {
        let status = log.status_code.to_string();
        let status_colored = match log.status_code {
            500..=599 => status.red().bold(),
            400..=499 => status.yellow().bold(),
            _ => status.green(),
        };

        println!(
            "{} {} {} {:<6} {} {}",
            format!("#{}", log.id).dimmed(),
            log.timestamp
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string()
                .dimmed(),
            status_colored,
            log.method,
            log.endpoint.cyan(),
            format!("{:.2}ms", log.latency_ms).dimmed()
        );

        if let Some(error) = &log.error_message {
            println!("  {}", format!("error: {}", error).red());
        }
    }
}
