//! Request admission: address allowlist and rate limiting
//!
//! Every denial is logged on the `seva::security` target and returned to the
//! caller; nothing here downgrades a refusal to a warning.

pub mod allowlist;
pub mod rate_limit;

use std::net::IpAddr;
use std::path::PathBuf;

use seva_core::{Environment, SecurityConfig};
use thiserror::Error;

pub use allowlist::IpAllowlist;
pub use rate_limit::RateLimitLedger;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("address {ip} is not permitted")]
    IpNotAllowed { ip: IpAddr },

    #[error("too many requests from {ip}, retry in {retry_after}s")]
    RateLimited { ip: IpAddr, retry_after: u64 },

    #[error("rate-limit ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct SecurityGuard {
    allowlist: IpAllowlist,
    ledger: RateLimitLedger,
}

impl SecurityGuard {
    pub fn new(config: &SecurityConfig, environment: Environment) -> Self {
        Self {
            allowlist: IpAllowlist::new(&config.ip_allowlist, environment),
            ledger: RateLimitLedger::new(
                config.ledger_path.clone(),
                config.rate_limit_max,
                config.rate_limit_window,
            ),
        }
    }

    pub fn allowlist(&self) -> &IpAllowlist {
        &self.allowlist
    }

    pub fn ledger(&self) -> &RateLimitLedger {
        &self.ledger
    }

    /// Allowlist first, then the rate limit; a refused address never
    /// reaches the ledger.
    pub async fn admit(&self, ip: IpAddr) -> Result<(), SecurityError> {
        if !self.allowlist.permits(ip) {
            tracing::warn!(target: "seva::security", %ip, "address not on allowlist");
            return Err(SecurityError::IpNotAllowed { ip });
        }

        match self.ledger.check(ip).await {
            Err(SecurityError::RateLimited { retry_after, .. }) => {
                tracing::warn!(target: "seva::security", %ip, retry_after, "rate limit exceeded");
                Err(SecurityError::RateLimited { ip, retry_after })
            }
            Err(e) => {
                tracing::error!(target: "seva::security", error = %e, "rate-limit ledger failure");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }
}
