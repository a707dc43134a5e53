//! Router harness for route tests: in-memory portal database, temp ledger,
//! fixed peer address

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use seva_core::{Environment, SecurityConfig};
use serde_json::Value as JsonValue;
use tempfile::TempDir;
use tower::ServiceExt;

use super::server::build_router;
use crate::db::testing::portal_db;
use crate::db::Database;
use crate::request::{SessionStore, CSRF_HEADER};
use crate::security::SecurityGuard;
use crate::state::AppState;

pub(crate) struct TestApp {
    pub state: AppState,
    router: Router,
    _ledger_dir: TempDir,
}

/// Cookie header value plus the CSRF token issued with it.
pub(crate) struct TestSession {
    pub cookie: String,
    pub csrf: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_rate_limit(1_000).await
    }

    pub async fn with_rate_limit(max: u32) -> Self {
        Self::build(portal_db().await, max)
    }

    /// Harness over a caller-supplied database.
    pub fn with_database(db: Database) -> Self {
        Self::build(db, 1_000)
    }

    fn build(db: Database, max: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let security = SecurityConfig {
            ip_allowlist: Vec::new(),
            rate_limit_max: max,
            rate_limit_window: Duration::from_secs(60),
            ledger_path: dir.path().join("rate_limit.json"),
        };
        let state = AppState::new(
            db,
            SecurityGuard::new(&security, Environment::Development),
            SessionStore::default(),
        );
        let router = build_router(state.clone(), false)
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50_000))));

        Self {
            state,
            router,
            _ledger_dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, JsonValue) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, headers, body)
    }

    pub async fn session(&self) -> TestSession {
        let (status, headers, body) = self.send(get("/api/session")).await;
        assert_eq!(status, StatusCode::OK);
        let cookie = headers[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        TestSession {
            cookie,
            csrf: body["csrf_token"].as_str().unwrap().to_string(),
        }
    }
}

pub(crate) fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub(crate) fn get_with(uri: &str, session: &TestSession) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, &session.cookie)
        .body(Body::empty())
        .unwrap()
}

/// JSON request carrying the session cookie and, when given, a CSRF token.
pub(crate) fn json(
    method: Method,
    uri: &str,
    body: JsonValue,
    session: &TestSession,
    csrf: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, &session.cookie);
    if let Some(token) = csrf {
        builder = builder.header(CSRF_HEADER, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
