use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "api-monitor",
    version,
    about = "Request logging, rate limiting and log aggregation for HTTP APIs"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the monitored server (default)
    Serve,

    /// Run the aggregation job once and print the report
    Aggregate {
        /// Override aggregation.window_minutes
        #[arg(short, long)]
        window_minutes: Option<u64>,
    },

    /// Query stored request logs
    Logs(crate::commands::logs::LogsArgs),

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli {
            config: PathBuf::from("config.toml"),
            command: None,
        };

        assert!(matches!(cli.get_command(), Commands::Serve));
    }

    #[test]
    fn test_parse_aggregate_with_override() {
        let cli = Cli::parse_from([
            "api-monitor",
            "--config",
            "/etc/api-monitor.toml",
            "aggregate",
            "--window-minutes",
            "15",
        ]);

        assert_eq!(cli.config, PathBuf::from("/etc/api-monitor.toml"));
        match cli.get_command() {
            Commands::Aggregate { window_minutes } => assert_eq!(window_minutes, Some(15)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_logs_filters() {
        let cli = Cli::parse_from(["api-monitor", "logs", "--status-code", "500", "--limit", "5"]);

        match cli.get_command() {
            Commands::Logs(args) => {
                assert_eq!(args.status_code, Some(500));
                assert_eq!(args.limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = Cli::parse_from(["api-monitor", "config", "validate"]);
        assert!(matches!(
            cli.get_command(),
            Commands::Config {
                action: ConfigCommands::Validate
            }
        ));
    }
}
