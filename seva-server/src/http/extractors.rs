//! Custom Axum extractors

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use super::error::ApiError;
use crate::request::{ValidationError, CSRF_HEADER, SESSION_COOKIE};
use crate::state::AppState;

/// Positive integer id from the path
pub struct ValidId(pub i64);

impl<S> FromRequestParts<S> for ValidId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::from(ValidationError::Empty { field: "id" }))?;

        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(ValidationError::InvalidFormat {
                field: "id",
                reason: "must be a positive integer",
            }
            .into()),
        }
    }
}

/// A live session named by the `seva_session` cookie
pub struct ClientSession(pub String);

impl FromRequestParts<AppState> for ClientSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let id = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|id| state.sessions().touch(id))
            .ok_or_else(|| ApiError::forbidden("no active session"))?;
        Ok(Self(id))
    }
}

/// Mutating requests must echo the session's CSRF token in `x-csrf-token`.
pub struct CsrfVerified {
    pub session_id: String,
}

impl FromRequestParts<AppState> for CsrfVerified {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ClientSession(session_id) = ClientSession::from_request_parts(parts, state).await?;

        let supplied = parts
            .headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if supplied.is_empty() || !state.sessions().verify_csrf(&session_id, supplied) {
            tracing::warn!(target: "seva::security", method = %parts.method, uri = %parts.uri, "CSRF token rejected");
            return Err(ApiError::forbidden("missing or invalid CSRF token"));
        }
        Ok(Self { session_id })
    }
}
