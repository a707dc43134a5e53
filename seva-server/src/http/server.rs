//! Axum server setup
//!
//! - Localhost-only CORS by default
//! - Tracing middleware
//! - Admission gate (allowlist + rate limit) on `/api`
//! - Graceful shutdown on SIGTERM/Ctrl+C, closing the database connection

use std::net::SocketAddr;

use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::Router;
use seva_core::ServerConfig;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::middleware::security_gate;
use super::routes;
use crate::state::AppState;

const LOCAL_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8080",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:8080",
];

fn cors_layer(permissive: bool) -> CorsLayer {
    if permissive {
        tracing::warn!("CORS: Permissive mode enabled - all origins allowed");
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = LOCAL_ORIGINS
        .iter()
        .copied()
        .map(HeaderValue::from_static)
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the application router with all routes
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let api = Router::new()
        .merge(routes::status::router())
        .merge(routes::session::router())
        .merge(routes::teachers::router())
        .merge(routes::bookings::router())
        .merge(routes::vehicles::router())
        .merge(routes::feedback::router())
        .route_layer(from_fn_with_state(state.clone(), security_gate));

    Router::new()
        .merge(routes::health::router())
        .nest("/api", api)
        .layer(cors_layer(cors_permissive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives.
pub async fn run_server(state: AppState, config: &ServerConfig) -> Result<(), ServerError> {
    let app = build_router(state.clone(), config.cors_permissive);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        environment = %state.environment(),
        "Server listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.db().close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{get, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = TestApp::new().await;
        let (status, _, _) = app.send(get("/api/nothing-here")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_routes_are_rate_limited_but_health_is_not() {
        let app = TestApp::with_rate_limit(2).await;
        assert_eq!(app.send(get("/api/status")).await.0, StatusCode::OK);
        assert_eq!(app.send(get("/api/status")).await.0, StatusCode::OK);

        let (status, headers, body) = app.send(get("/api/status")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key("retry-after"));
        assert_eq!(body["error"], "rate_limited");

        assert_eq!(app.send(get("/health")).await.0, StatusCode::OK);
    }

    #[test]
    fn local_origins_parse() {
        let _ = cors_layer(false);
        let _ = cors_layer(true);
    }
}
