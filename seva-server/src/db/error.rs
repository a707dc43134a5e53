//! Data-layer error taxonomy

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    /// Every retry and failover host was exhausted. The message is already
    /// environment-gated: detailed outside production, opaque inside it.
    #[error("connection error: {message} (ref {correlation_id})")]
    Connection { message: String, correlation_id: Uuid },

    /// A single statement failed. Never retried by this layer.
    #[error("query error: {message} (ref {correlation_id})")]
    Query { message: String, correlation_id: Uuid },

    /// Caller misuse: unconditional update/delete, unbalanced transactions,
    /// empty SQL, bad identifiers.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("not found: {resource} '{id}'")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    /// A row did not have the shape a repository expected.
    #[error("decode error: column '{column}' {reason}")]
    Decode { column: String, reason: String },
}

impl DbError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            Self::Connection { correlation_id, .. } | Self::Query { correlation_id, .. } => {
                Some(*correlation_id)
            }
            _ => None,
        }
    }
}
