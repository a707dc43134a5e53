//! API error types with IntoResponse
//!
//! Errors are converted to JSON responses with appropriate status codes.
//! Connection and query messages arrive already gated by environment, so
//! production responses carry only a generic message and a correlation id.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::db::DbError;
use crate::request::{ValidationError, ValidationErrors};
use crate::security::SecurityError;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Validation failed (400)
    Validation(ValidationErrors),

    /// Caller misuse surfaced by the data layer (400)
    BadRequest { message: String },

    /// Resource not found (404)
    NotFound { resource: &'static str, id: String },

    /// State conflict such as a taken slot (409)
    Conflict { message: String },

    /// Missing session, bad CSRF token, address not allowed (403)
    Forbidden { reason: String },

    /// Rate limit hit (429)
    RateLimited { retry_after: u64 },

    /// Database unreachable (503)
    Unavailable { message: String, correlation_id: Uuid },

    /// Statement failed (500)
    Query { message: String, correlation_id: Uuid },

    /// Internal error (500, logged)
    Internal { message: String },
}

impl ApiError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Query { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> JsonValue {
        match self {
            Self::Validation(errors) => json!({
                "error": "validation_error",
                "message": errors.to_string(),
                "fields": errors,
            }),
            Self::BadRequest { message } => json!({
                "error": "bad_request",
                "message": message,
            }),
            Self::NotFound { resource, id } => json!({
                "error": "not_found",
                "message": format!("{} '{}' not found", resource, id),
            }),
            Self::Conflict { message } => json!({
                "error": "conflict",
                "message": message,
            }),
            Self::Forbidden { reason } => json!({
                "error": "forbidden",
                "message": reason,
            }),
            Self::RateLimited { retry_after } => json!({
                "error": "rate_limited",
                "message": format!("too many requests, retry in {} seconds", retry_after),
            }),
            Self::Unavailable {
                message,
                correlation_id,
            } => json!({
                "error": "service_unavailable",
                "message": message,
                "correlation_id": correlation_id,
            }),
            Self::Query {
                message,
                correlation_id,
            } => json!({
                "error": "query_failed",
                "message": message,
                "correlation_id": correlation_id,
            }),
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                json!({
                    "error": "internal_error",
                    "message": "an internal error occurred",
                })
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.into());
        }
        response
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self {
        Self::Validation(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.into())
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound { resource, id } => Self::NotFound { resource, id },
            DbError::Conflict(message) => Self::Conflict { message },
            DbError::InvalidOperation(message) => Self::BadRequest { message },
            DbError::Connection {
                message,
                correlation_id,
            } => Self::Unavailable {
                message,
                correlation_id,
            },
            DbError::Query {
                message,
                correlation_id,
            } => Self::Query {
                message,
                correlation_id,
            },
            e @ DbError::Decode { .. } => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

impl From<SecurityError> for ApiError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::IpNotAllowed { .. } => Self::forbidden("access denied"),
            SecurityError::RateLimited { retry_after, .. } => Self::RateLimited { retry_after },
            e @ SecurityError::Ledger { .. } => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}
