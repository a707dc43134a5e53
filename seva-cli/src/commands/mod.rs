//! Subcommand implementations

pub mod config;
pub mod database;
pub mod serve;

use anyhow::{anyhow, Result};
use seva_core::{ConfigError, SevaConfig};

/// Turn collected configuration errors into one startup failure.
pub fn require_config(resolved: Result<SevaConfig, Vec<ConfigError>>) -> Result<SevaConfig> {
    resolved.map_err(|errors| {
        for err in &errors {
            tracing::error!(key = err.key(), "{}", err);
        }
        let listed: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow!(
            "invalid configuration ({} error{}): {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            listed.join("; ")
        )
    })
}
