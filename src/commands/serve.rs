use anyhow::Result;
use std::path::Path;

use api_monitor::config;
use api_monitor::server;

/// Execute the serve command
pub async fn execute(config_path: &Path) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    server::start_server(cfg).await
}
