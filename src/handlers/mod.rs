pub mod analytics;
pub mod demo;
pub mod health;
pub mod metrics_handler;
