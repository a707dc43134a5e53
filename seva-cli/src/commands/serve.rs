//! HTTP server command

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use seva_core::{ConfigError, SevaConfig};
use seva_server::{run_server, AppState};

use super::require_config;

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to (overrides SEVA_BIND)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long)]
    pub cors_permissive: bool,
}

/// Run the API server until Ctrl+C/SIGTERM.
pub async fn run_serve(resolved: Result<SevaConfig, Vec<ConfigError>>, args: ServeArgs) -> Result<()> {
    let mut config = require_config(resolved)?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    config.server.cors_permissive |= args.cors_permissive;

    tracing::info!(
        environment = %config.environment,
        driver = config.database.driver.as_str(),
        bind = %config.server.bind_addr,
        "Starting seva server"
    );

    let state = AppState::from_config(&config);
    run_server(state, &config.server).await.context("Server error")?;
    Ok(())
}
