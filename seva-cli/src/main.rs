//! seva - KIIT SEVA portal server and maintenance tool
//!
//! - `serve`: run the JSON API (teachers, bookings, transport, feedback)
//! - `check-config`: resolve and print the configuration, secrets redacted
//! - `status`: connect once and report connection and health metrics
//! - `migrate`: create any missing portal tables

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use seva_core::{ConfigError, SevaConfig};

mod commands;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "seva",
    author,
    version,
    about = "KIIT SEVA student-services portal: API server and database tooling"
)]
struct Cli {
    /// Debug-level console logging (RUST_LOG still wins)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve(commands::serve::ServeArgs),
    /// Resolve configuration and print it with secrets redacted
    CheckConfig,
    /// Connect to the database once and print status and health metrics
    Status,
    /// Create missing tables and indexes
    Migrate,
}

/// Load `.env` from the working directory, then `~/.seva/.env`.
/// Variables already present in the environment are never overridden.
fn load_dotenv() {
    dotenvy::dotenv().ok();
    if let Some(home) = dirs::home_dir() {
        let path: PathBuf = home.join(".seva").join(".env");
        if path.exists() {
            dotenvy::from_path(&path).ok();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_dotenv();

    let resolved: Result<SevaConfig, Vec<ConfigError>> = SevaConfig::from_env();
    tracing_setup::init(&tracing_setup::TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
        log_dir: resolved.as_ref().ok().and_then(|c| c.log_dir.clone()),
    })?;

    let outcome = match cli.command {
        Commands::Serve(args) => commands::serve::run_serve(resolved, args).await,
        Commands::CheckConfig => commands::config::run_check_config(resolved),
        Commands::Status => commands::database::run_status(resolved).await,
        Commands::Migrate => commands::database::run_migrate(resolved).await,
    };

    tracing_setup::shutdown_otel();
    outcome
}
