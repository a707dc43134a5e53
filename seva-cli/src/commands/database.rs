//! `seva status` and `seva migrate`

use anyhow::{bail, Context, Result};
use serde::Serialize;
use seva_core::{ConfigError, SevaConfig};
use seva_server::db::{schema, ConnectionStatus, Database, HealthMetrics};

use super::require_config;

#[derive(Serialize)]
struct StatusReport {
    status: ConnectionStatus,
    health: HealthMetrics,
}

pub async fn run_status(resolved: Result<SevaConfig, Vec<ConfigError>>) -> Result<()> {
    let config = require_config(resolved)?;
    let db = Database::from_config(&config);

    let healthy = db.health_check().await;
    let report = StatusReport {
        status: db.connection_status(),
        health: db.health_metrics(),
    };
    db.close().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize status report")?
    );
    if !healthy {
        bail!("database at {} is unreachable", report.status.target);
    }
    Ok(())
}

pub async fn run_migrate(resolved: Result<SevaConfig, Vec<ConfigError>>) -> Result<()> {
    let config = require_config(resolved)?;
    let db = Database::from_config(&config);

    let result = schema::ensure(&db).await;
    db.close().await;
    result.context("Schema bootstrap failed")?;

    println!("Schema up to date ({} tables)", schema::table_names().len());
    Ok(())
}
