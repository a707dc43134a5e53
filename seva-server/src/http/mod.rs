//! HTTP server layer
//!
//! Axum server with:
//! - CORS (localhost only by default)
//! - Request tracing
//! - Allowlist and rate-limit admission on `/api`
//! - Graceful shutdown
//! - JSON error responses

pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ApiError;
pub use server::{build_router, run_server, ServerError};
