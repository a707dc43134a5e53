//! Configuration errors
//!
//! Every variant is fatal at startup: the server must not begin serving
//! requests while any of these are present.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key}: {value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{key}: unsupported charset '{value}'")]
    UnsupportedCharset { key: &'static str, value: String },

    #[error("{key}: file not found: {}", path.display())]
    MissingFile { key: &'static str, path: PathBuf },

    #[error("{key} cannot be empty")]
    Empty { key: &'static str },
}

impl ConfigError {
    /// The environment key the error refers to.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Invalid { key, .. }
            | Self::OutOfRange { key, .. }
            | Self::UnsupportedCharset { key, .. }
            | Self::MissingFile { key, .. }
            | Self::Empty { key } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_display() {
        let err = ConfigError::OutOfRange {
            key: "SEVA_DB_RETRIES",
            value: 11,
            min: 1,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "SEVA_DB_RETRIES: 11 is outside the allowed range 1..=10"
        );
        assert_eq!(err.key(), "SEVA_DB_RETRIES");
    }
}
