//! `seva check-config`

use anyhow::{Context, Result};
use seva_core::{ConfigError, SevaConfig};

/// Print the resolved configuration as JSON, or every problem found and exit 1.
pub fn run_check_config(resolved: Result<SevaConfig, Vec<ConfigError>>) -> Result<()> {
    match resolved {
        Ok(config) => {
            let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
            println!("{}", json);
            Ok(())
        }
        Err(errors) => {
            eprintln!("Configuration has {} problem(s):", errors.len());
            for err in &errors {
                eprintln!("  - {}", err);
            }
            std::process::exit(1);
        }
    }
}
