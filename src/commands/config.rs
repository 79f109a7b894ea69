use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tracing::info;

use api_monitor::config::{self, Config};

/// Execute the config show command
///
/// Displays the effective configuration (file overlaid with environment)
pub fn show(config_path: &Path) -> Result<()> {
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration...");
    info!(path = %config_path.display(), "Validating configuration file");

    if !config_path.exists() {
        println!(
            "{}",
            format!("No file at {}, validating defaults", config_path.display()).yellow()
        );
    }

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    print_summary(&cfg);

    Ok(())
}

fn print_summary(cfg: &Config) {
    println!("{}", "Summary:".bold());
    println!("  Listen:       {}:{}", cfg.server.host, cfg.server.port);
    println!("  Database:     {}", cfg.database.path);
    println!(
        "  Rate limit:   {}",
        if cfg.rate_limit.enabled {
            format!("{} burst, {}/min", cfg.rate_limit.capacity, cfg.rate_limit.rpm)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  Aggregation:  {}",
        if cfg.aggregation.enabled {
            format!(
                "every {}s over {} min ({:?}, settle {}s)",
                cfg.aggregation.interval_secs,
                cfg.aggregation.window_minutes,
                cfg.aggregation.mode,
                cfg.aggregation.settle_secs
            )
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  Bypass paths: {}",
        cfg.bypass_paths.iter().collect::<Vec<_>>().join(", ")
    );
}
