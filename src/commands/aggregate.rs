use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use api_monitor::aggregation::AggregationJob;
use api_monitor::config;
use api_monitor::store::{LogStore, SqliteStore};

/// Execute the aggregate command
///
/// Runs the configured aggregation job once against the configured database.
/// In checkpoint mode this advances the same high-water mark the server uses.
pub async fn execute(config_path: &Path, window_minutes: Option<u64>) -> Result<()> {
    let mut cfg = config::load_config(config_path)?;
    if let Some(window) = window_minutes {
        cfg.aggregation.window_minutes = window;
        config::validate_config(&cfg)?;
    }

    let store: Arc<dyn LogStore> = Arc::new(
        SqliteStore::open(&cfg.database.path)
            .await
            .context("Failed to open log store")?,
    );
    let job = AggregationJob::from_config(store, &cfg.aggregation);

    info!(job = %job.name(), mode = ?job.mode(), "Running aggregation once");
    let report = job.run().await.context("Aggregation failed")?;

    println!("{}", "✓ Aggregation complete".green().bold());
    println!();
    println!("  Job:        {}", job.name());
    println!("  Mode:       {:?}", job.mode());
    println!(
        "  Window:     {} → {}",
        report.window_start.format("%Y-%m-%d %H:%M:%S"),
        report.window_end.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Records:    {}", report.records_scanned);
    println!("  Summaries:  {}", report.summaries_written);

    if report.records_scanned == 0 {
        println!();
        println!("{}", "No logs found to aggregate".yellow());
    }

    Ok(())
}
