use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use api_monitor::config::{load_config, Config};
use api_monitor::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    // Logging settings come from the config; fall back to defaults if it is broken
    // so that the error itself can still be reported
    let logging = load_config(&args.config).unwrap_or_else(|_| Config::default());
    init_tracing(&logging.server.log_level, &logging.server.log_format);

    // Dispatch to appropriate command handler
    match args.get_command() {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::Aggregate { window_minutes } => {
            commands::aggregate::execute(&args.config, window_minutes).await?;
        }
        cli::Commands::Logs(logs_args) => {
            commands::logs::execute(&args.config, logs_args).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("API Monitor v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
