//! seva-core: configuration for the KIIT SEVA portal data layer
//!
//! Resolves the process-wide configuration once at startup from
//! environment-specific defaults plus `SEVA_*` overrides. Resolution is
//! a pure function over a key lookup so it can be driven from a map in tests.

pub mod config;
pub mod environment;
pub mod error;
pub mod secret;

pub use config::{
    ConnectionConfig, Driver, SecurityConfig, ServerConfig, SevaConfig, TlsConfig, TlsMode,
};
pub use environment::Environment;
pub use error::ConfigError;
pub use secret::Secret;
