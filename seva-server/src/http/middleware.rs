//! Admission middleware for the API routes

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::error::ApiError;
use crate::state::AppState;

/// Allowlist and rate limit, keyed by the peer address.
pub async fn security_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.guard().admit(peer.ip()).await?;
    Ok(next.run(request).await)
}
