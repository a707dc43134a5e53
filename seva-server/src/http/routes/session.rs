//! Session bootstrap
//!
//! GET /api/session - resumes or starts a session, hands out its CSRF token
//! and drains pending flash messages.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;

use crate::http::error::ApiError;
use crate::request::{Flash, SESSION_COOKIE};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionResponse {
    pub csrf_token: String,
    pub flashes: Vec<Flash>,
    pub created: bool,
}

async fn open_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), ApiError> {
    let sessions = state.sessions();
    let presented = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let (id, created) = sessions.open(presented.as_deref());

    let csrf_token = sessions.csrf_token(&id).ok_or_else(|| ApiError::Internal {
        message: "session disappeared while issuing CSRF token".to_string(),
    })?;
    let flashes = sessions.take_flashes(&id);

    let cookie = Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.environment().is_production())
        .build();

    Ok((
        jar.add(cookie),
        Json(SessionResponse {
            csrf_token,
            flashes,
            created,
        }),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/session", get(open_session))
}
