//! Connection status endpoint
//!
//! GET /api/status - where the data layer is connected and since when.
//! Hostnames are withheld in production.

use axum::extract::State;
use axum::{routing::get, Json, Router};

use crate::db::ConnectionStatus;
use crate::state::AppState;

/// GET /api/status
async fn status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    let mut status = state.db().connection_status();
    if state.environment().is_production() {
        status.target = status.driver.as_str().to_string();
        status.current_host = None;
    }
    Json(status)
}

/// Status routes
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}
