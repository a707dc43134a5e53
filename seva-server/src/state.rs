//! Application state shared across handlers

use std::sync::Arc;

use seva_core::{Environment, SevaConfig};

use crate::db::Database;
use crate::request::SessionStore;
use crate::security::SecurityGuard;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    sessions: SessionStore,
    guard: SecurityGuard,
}

impl AppState {
    pub fn new(db: Database, guard: SecurityGuard, sessions: SessionStore) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db, sessions, guard }),
        }
    }

    /// Production wiring: real connector, ledger at the configured path.
    pub fn from_config(config: &SevaConfig) -> Self {
        Self::new(
            Database::from_config(config),
            SecurityGuard::new(&config.security, config.environment),
            SessionStore::default(),
        )
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn guard(&self) -> &SecurityGuard {
        &self.inner.guard
    }

    pub fn environment(&self) -> Environment {
        self.inner.db.environment()
    }
}
