//! Command implementations for the CLI
//!
//! - serve: Start the monitored server
//! - aggregate: Run the aggregation job once
//! - logs: Query stored request logs
//! - config: Configuration display and validation

pub mod aggregate;
pub mod config;
pub mod logs;
pub mod serve;
