//! Database layer - connection lifecycle, data access and repositories
//!
//! # Design Principles
//!
//! - One shared [`ConnectionManager`] per process, injected, never global
//! - Connection acquisition is retried; statements are not
//! - No mass mutation without an explicit predicate
//! - Reads cached by fingerprint, invalidated by table tag on every write

pub mod access;
pub mod cache;
pub mod connector;
pub mod error;
pub mod manager;
pub mod pagination;
pub mod repos;
pub mod schema;
pub mod sql;
pub mod stats;
pub mod transaction;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{ConnectionStatus, Database, FindOptions, HealthMetrics};
pub use cache::{Fingerprint, ResultCache, TtlCache};
pub use connector::{ConnectTarget, Connector, ExecResult, Session, SqlxConnector, TargetRole};
pub use error::DbError;
pub use manager::{ConnectionHandle, ConnectionManager, ConnectionSnapshot, Lease};
pub use pagination::{Paginated, Pagination, PaginationParams};
pub use sql::{Condition, Conditions, Dialect, OrderBy};
pub use stats::{QueryStat, QueryStats};
pub use transaction::Transaction;
pub use value::{Fields, Row, Value};
