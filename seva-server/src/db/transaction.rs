//! Transactions: an owned guard over the primary connection
//!
//! - [`Transaction`] holds the primary lease from `BEGIN` until its outermost
//!   level ends; no other caller can run a statement inside it
//! - Nested begins push uniquely named savepoints; every commit or rollback
//!   pops exactly one level
//! - A guard dropped while open leaves its handle marked; the manager rolls
//!   it back before the handle is reused

use std::collections::BTreeSet;

use super::access::{Database, FindOptions};
use super::error::DbError;
use super::manager::{ConnectionHandle, Lease};
use super::sql::{referenced_tables, Conditions, Dialect};
use super::value::{Fields, Row, Value};

/// What a `begin` does at the current depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxBegin {
    Outer,
    Savepoint(String),
}

/// What a `commit`/`rollback` does at the current depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEnd {
    Commit,
    Rollback,
    Release(String),
    RollbackTo(String),
}

impl TxBegin {
    pub fn statements(&self, dialect: Dialect) -> Vec<String> {
        match self {
            Self::Outer if dialect == Dialect::MySql => vec!["START TRANSACTION".to_string()],
            Self::Outer => vec!["BEGIN".to_string()],
            Self::Savepoint(name) => vec![format!("SAVEPOINT {}", name)],
        }
    }
}

impl TxEnd {
    pub fn statements(&self) -> Vec<String> {
        match self {
            Self::Commit => vec!["COMMIT".to_string()],
            Self::Rollback => vec!["ROLLBACK".to_string()],
            Self::Release(name) => vec![format!("RELEASE SAVEPOINT {}", name)],
            // rolling back to a savepoint keeps it; release it so the level is gone
            Self::RollbackTo(name) => vec![
                format!("ROLLBACK TO SAVEPOINT {}", name),
                format!("RELEASE SAVEPOINT {}", name),
            ],
        }
    }

    /// Whether this pops the outer transaction.
    pub fn is_outer(&self) -> bool {
        matches!(self, Self::Commit | Self::Rollback)
    }
}

#[derive(Debug, Default)]
pub struct TransactionState {
    active: bool,
    savepoints: Vec<String>,
    seq: u64,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 0 when idle, 1 for the outer transaction, +1 per savepoint.
    pub fn depth(&self) -> usize {
        if self.active {
            1 + self.savepoints.len()
        } else {
            0
        }
    }

    pub fn plan_begin(&mut self) -> TxBegin {
        if !self.active {
            return TxBegin::Outer;
        }
        self.seq += 1;
        TxBegin::Savepoint(format!("sp_{}", self.seq))
    }

    /// Record a begin whose statements succeeded.
    pub fn begun(&mut self, step: TxBegin) {
        match step {
            TxBegin::Outer => {
                self.active = true;
                self.savepoints.clear();
            }
            TxBegin::Savepoint(name) => self.savepoints.push(name),
        }
    }

    pub fn plan_end(&self, commit: bool) -> Result<TxEnd, DbError> {
        if !self.active {
            let verb = if commit { "commit" } else { "rollback" };
            return Err(DbError::invalid(format!("{} without an active transaction", verb)));
        }
        Ok(match (self.savepoints.last(), commit) {
            (Some(name), true) => TxEnd::Release(name.clone()),
            (Some(name), false) => TxEnd::RollbackTo(name.clone()),
            (None, true) => TxEnd::Commit,
            (None, false) => TxEnd::Rollback,
        })
    }

    /// Record an end. The outer transaction is over whatever the outcome;
    /// a savepoint level is only popped once its statements succeeded.
    pub fn ended(&mut self, end: &TxEnd, succeeded: bool) {
        if end.is_outer() {
            self.active = false;
            self.savepoints.clear();
        } else if succeeded {
            self.savepoints.pop();
        }
    }
}

/// An open transaction and exclusive use of the primary connection.
///
/// Obtained from [`Database::begin_transaction`]. Every statement that should
/// be part of the transaction must go through the guard; the same calls on
/// the [`Database`] wait until the guard lets go of the connection.
pub struct Transaction<'a> {
    db: &'a Database,
    lease: Option<Lease<'a>>,
    touched: BTreeSet<String>,
}

impl<'a> Transaction<'a> {
    pub(super) async fn open(db: &'a Database) -> Result<Self, DbError> {
        let lease = db.manager().connect(false).await?;
        let mut tx = Self {
            db,
            lease: Some(lease),
            touched: BTreeSet::new(),
        };
        tx.push_level().await?;
        Ok(tx)
    }

    /// Levels still open: 1 for the outer transaction, +1 per savepoint.
    pub fn depth(&self) -> usize {
        self.lease.as_ref().map_or(0, |lease| lease.tx.depth())
    }

    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Push a savepoint inside this transaction.
    pub async fn begin_transaction(&mut self) -> Result<bool, DbError> {
        self.push_level().await?;
        Ok(true)
    }

    /// Commit the innermost level (release a savepoint, or commit).
    pub async fn commit(&mut self) -> Result<bool, DbError> {
        self.pop_level(true).await
    }

    /// Roll back the innermost level (to a savepoint, or the whole transaction).
    pub async fn rollback(&mut self) -> Result<bool, DbError> {
        self.pop_level(false).await
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let db = self.db;
        let result = db.execute_on(Some(self.handle()?), sql, params).await;
        self.touched.extend(referenced_tables(sql));
        result
    }

    /// Read inside the transaction; never cached.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let db = self.db;
        db.query_on(Some(self.handle()?), sql, params).await
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        let db = self.db;
        db.fetch_one_on(Some(self.handle()?), sql, params, None).await
    }

    pub async fn insert(&mut self, table: &str, data: Fields) -> Result<i64, DbError> {
        let db = self.db;
        let result = db.insert_on(Some(self.handle()?), table, data).await;
        self.touch(table);
        result
    }

    pub async fn update(&mut self, table: &str, data: Fields, conditions: &Conditions) -> Result<u64, DbError> {
        let db = self.db;
        let result = db.update_on(Some(self.handle()?), table, data, conditions).await;
        self.touch(table);
        result
    }

    pub async fn delete(&mut self, table: &str, conditions: &Conditions) -> Result<u64, DbError> {
        let db = self.db;
        let result = db.delete_on(Some(self.handle()?), table, conditions).await;
        self.touch(table);
        result
    }

    pub async fn find(&mut self, table: &str, id: i64) -> Result<Option<Row>, DbError> {
        self.find_where(table, &Conditions::new().eq("id", id)).await
    }

    pub async fn find_where(&mut self, table: &str, conditions: &Conditions) -> Result<Option<Row>, DbError> {
        let db = self.db;
        db.find_where_on(Some(self.handle()?), table, conditions).await
    }

    pub async fn find_all(
        &mut self,
        table: &str,
        conditions: &Conditions,
        options: &FindOptions,
    ) -> Result<Vec<Row>, DbError> {
        let db = self.db;
        db.find_all_on(Some(self.handle()?), table, conditions, options).await
    }

    pub async fn exists(&mut self, table: &str, conditions: &Conditions) -> Result<bool, DbError> {
        let db = self.db;
        db.exists_on(Some(self.handle()?), table, conditions).await
    }

    pub async fn count(&mut self, table: &str, conditions: &Conditions) -> Result<i64, DbError> {
        let db = self.db;
        db.count_on(Some(self.handle()?), table, conditions).await
    }

    fn handle(&mut self) -> Result<&mut ConnectionHandle, DbError> {
        self.lease
            .as_deref_mut()
            .ok_or_else(|| DbError::invalid("transaction already finished"))
    }

    fn touch(&mut self, table: &str) {
        self.touched.insert(table.to_ascii_lowercase());
    }

    async fn push_level(&mut self) -> Result<(), DbError> {
        let db = self.db;
        let handle = self.handle()?;
        let step = handle.tx.plan_begin();

        for statement in step.statements(handle.dialect()) {
            db.script(handle, &statement).await?;
        }

        handle.tx.begun(step);
        let depth = handle.tx.depth();
        db.manager().set_transaction_depth(depth);
        tracing::debug!(depth, "transaction level opened");
        Ok(())
    }

    async fn pop_level(&mut self, commit: bool) -> Result<bool, DbError> {
        let db = self.db;
        let Some(handle) = self.lease.as_deref_mut() else {
            let verb = if commit { "commit" } else { "rollback" };
            return Err(DbError::invalid(format!("{} without an active transaction", verb)));
        };
        let end = handle.tx.plan_end(commit)?;

        let mut outcome = Ok(());
        for statement in end.statements() {
            outcome = db.script(handle, &statement).await;
            if outcome.is_err() {
                break;
            }
        }

        handle.tx.ended(&end, outcome.is_ok());
        let depth = handle.tx.depth();
        db.manager().set_transaction_depth(depth);
        tracing::debug!(depth, commit, "transaction level closed");

        if depth == 0 {
            self.lease = None;
            // other callers may have cached committed rows while this was open
            for table in std::mem::take(&mut self.touched) {
                db.invalidate(&table);
            }
        }
        outcome.map(|_| true)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(lease) = &self.lease {
            if lease.tx.is_active() {
                tracing::warn!(
                    depth = lease.tx.depth(),
                    "transaction dropped while open; it is rolled back before the connection is reused"
                );
            }
        }
        for table in &self.touched {
            self.db.invalidate(table);
        }
    }
}
