//! Test doubles: a scripted connector and SQLite-backed databases

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use seva_core::{ConnectionConfig, Driver, Environment};
use tokio::time::Instant;

use super::access::Database;
use super::connector::{ConnectTarget, Connector, DriverError, ExecResult, FailureKind, Session, SqlxConnector};
use super::sql::Dialect;
use super::value::{Row, Value};

#[derive(Default)]
struct Shared {
    reachable: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<(String, Instant)>>,
    statements: Mutex<Vec<String>>,
    rows: Mutex<Vec<Row>>,
    ping_fails: AtomicBool,
    rejects_credentials: AtomicBool,
    pings: AtomicUsize,
    fetches: AtomicUsize,
    closed: AtomicUsize,
}

/// Counts connects and probes; only hosts marked reachable accept.
#[derive(Clone, Default)]
pub struct FakeConnector {
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reachable(hosts: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        fake.set_reachable(hosts);
        Arc::new(fake)
    }

    pub fn set_reachable(&self, hosts: &[&str]) {
        *self.shared.reachable.lock().unwrap() = hosts.iter().map(|h| h.to_string()).collect();
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.shared.ping_fails.store(fails, Ordering::SeqCst);
    }

    /// Every connect fails as an authentication error, reachable or not.
    pub fn set_rejects_credentials(&self, rejects: bool) {
        self.shared.rejects_credentials.store(rejects, Ordering::SeqCst);
    }

    /// Rows every `fetch` returns from now on.
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.shared.rows.lock().unwrap() = rows;
    }

    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.shared.attempts.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().unwrap().clone()
    }

    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>, DriverError> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .push((target.host.clone(), Instant::now()));

        if self.shared.rejects_credentials.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                FailureKind::Auth,
                format!("Access denied for user 'seva'@'{}'", target.host),
            ));
        }
        if self.shared.reachable.lock().unwrap().contains(&target.host) {
            Ok(Box::new(FakeSession {
                shared: Arc::clone(&self.shared),
            }))
        } else {
            Err(DriverError::new(
                FailureKind::Network,
                format!("connection refused: {}", target.host),
            ))
        }
    }
}

struct FakeSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl Session for FakeSession {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        self.shared.pings.fetch_add(1, Ordering::SeqCst);
        if self.shared.ping_fails.load(Ordering::SeqCst) {
            Err(DriverError::new(FailureKind::Network, "server has gone away"))
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<ExecResult, DriverError> {
        self.shared.statements.lock().unwrap().push(sql.to_string());
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(1),
        })
    }

    async fn fetch(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.shared.statements.lock().unwrap().push(sql.to_string());
        self.shared.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.rows.lock().unwrap().clone())
    }

    async fn run_script(&mut self, sql: &str) -> Result<(), DriverError> {
        self.shared.statements.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn sqlite_config(database: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::defaults(Environment::Development, Driver::Sqlite);
    config.database = database.to_string();
    config
}

/// Fresh in-memory SQLite database, development environment.
pub async fn sqlite_db() -> Database {
    sqlite_db_in(Environment::Development).await
}

pub async fn sqlite_db_in(environment: Environment) -> Database {
    let config = sqlite_config(":memory:");
    let connector = Arc::new(SqlxConnector::new(config.clone()));
    Database::with_connector(config, environment, connector)
}

/// SQLite database on disk; separate calls give independent connections.
pub async fn sqlite_file_db(path: &Path) -> Database {
    let config = sqlite_config(&path.to_string_lossy());
    let connector = Arc::new(SqlxConnector::new(config.clone()));
    Database::with_connector(config, Environment::Development, connector)
}

/// In-memory database with the portal schema applied.
pub async fn portal_db() -> Database {
    let db = sqlite_db().await;
    super::schema::ensure(&db).await.expect("schema applies");
    db
}
