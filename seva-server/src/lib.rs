//! seva-server: data-access layer and HTTP surface for KIIT SEVA
//!
//! Request handlers validate input (request), call a domain repository
//! (db::repos), which runs parameterized SQL through the shared
//! [`db::Database`] façade. The façade obtains a healthy connection from the
//! [`db::ConnectionManager`], caches reads and tracks statement statistics.

pub mod db;
pub mod http;
pub mod request;
pub mod security;
pub mod state;

pub use db::{Database, DbError};
pub use http::{build_router, run_server, ApiError};
pub use state::AppState;
