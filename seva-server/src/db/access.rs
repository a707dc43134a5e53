//! Data-Access Base - the façade every repository goes through
//!
//! - Statements run on a lease from the shared [`ConnectionManager`]
//! - Reads go to the replica when one is configured
//! - A [`Transaction`] holds the primary lease and runs its own statements
//! - Reads with a TTL are cached by fingerprint and tagged with their tables
//! - Every write invalidates the tags of the tables it touches
//! - `update`/`delete` refuse to run without a predicate

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use seva_core::{ConnectionConfig, Driver, Environment, SevaConfig};
use tokio::time::Instant;
use uuid::Uuid;

use super::cache::{CacheCounters, Fingerprint, ResultCache, TtlCache};
use super::connector::{Connector, DriverError, ExecResult, SqlxConnector};
use super::error::DbError;
use super::manager::{ConnectionHandle, ConnectionManager, ConnectionSnapshot};
use super::pagination::{Paginated, Pagination};
use super::sql::{identifier, normalize_sql, referenced_tables, Conditions, Dialect, OrderBy};
use super::stats::QueryStats;
use super::transaction::Transaction;
use super::value::{Fields, Row, Value};

/// Columns callers can never set through insert/update.
pub const PROTECTED_FIELDS: &[&str] = &["id", "created_at", "updated_at", "deleted_at"];

/// Timestamp layout stored in created/updated columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sorting, paging and caching for `find_all`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub ttl: Option<Duration>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn cached(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Diagnostics for `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub environment: Environment,
    pub driver: Driver,
    #[serde(flatten)]
    pub connection: ConnectionSnapshot,
    pub cache: CacheCounters,
    pub tracked_statements: usize,
}

/// Credential-free description of the current connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub environment: Environment,
    pub driver: Driver,
    pub connected: bool,
    pub target: String,
    pub current_host: Option<String>,
    pub replica_active: bool,
    pub in_transaction: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// Shared data-access service. Clone is cheap.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    manager: ConnectionManager,
    cache: Box<dyn ResultCache>,
    stats: QueryStats,
    timezone: Tz,
    slow_query_threshold: Duration,
}

impl Database {
    /// Production wiring: sqlx connector, in-memory TTL cache.
    pub fn from_config(config: &SevaConfig) -> Self {
        let connector = Arc::new(SqlxConnector::new(config.database.clone()));
        Self::with_connector(config.database.clone(), config.environment, connector)
    }

    pub fn with_connector(
        config: ConnectionConfig,
        environment: Environment,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_cache(config, environment, connector, Box::new(TtlCache::new()))
    }

    pub fn with_cache(
        config: ConnectionConfig,
        environment: Environment,
        connector: Arc<dyn Connector>,
        cache: Box<dyn ResultCache>,
    ) -> Self {
        let timezone = config.timezone;
        let slow_query_threshold = config.slow_query_threshold;
        Self {
            inner: Arc::new(DatabaseInner {
                manager: ConnectionManager::new(config, environment, connector),
                cache,
                stats: QueryStats::new(),
                timezone,
                slow_query_threshold,
            }),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn cache(&self) -> &dyn ResultCache {
        self.inner.cache.as_ref()
    }

    pub fn stats(&self) -> &QueryStats {
        &self.inner.stats
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.manager.dialect()
    }

    pub fn environment(&self) -> Environment {
        self.inner.manager.environment()
    }

    /// Current time in the configured zone, in [`TIMESTAMP_FORMAT`].
    pub fn now(&self) -> String {
        Utc::now()
            .with_timezone(&self.inner.timezone)
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }

    /// Today's date in the configured zone.
    pub fn today(&self) -> chrono::NaiveDate {
        Utc::now().with_timezone(&self.inner.timezone).date_naive()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Run a write; returns rows affected. Invalidates every table it names.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.execute_on(None, sql, params).await
    }

    /// Uncached read.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.fetch_all(sql, params, None).await
    }

    /// Read all rows, served from cache when `ttl` is given and a live entry exists.
    pub async fn fetch_all(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
    ) -> Result<Vec<Row>, DbError> {
        let rows = self.read(None, "all", sql, params, ttl, &[]).await?;
        Ok(unshare(rows))
    }

    /// First row or `None`; cached separately from `fetch_all` of the same SQL.
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
    ) -> Result<Option<Row>, DbError> {
        self.fetch_one_on(None, sql, params, ttl).await
    }

    /// Cached read with extra dependency tags beyond the tables in the SQL.
    pub async fn fetch_all_tagged(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Duration,
        tags: &[&str],
    ) -> Result<Vec<Row>, DbError> {
        let rows = self.read(None, "all", sql, params, Some(ttl), tags).await?;
        Ok(unshare(rows))
    }

    /// Drop cached results depending on `tag`.
    pub fn invalidate(&self, tag: &str) -> usize {
        self.inner.cache.invalidate_tag(tag)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Insert one row, stamping created/updated timestamps; returns the new id.
    pub async fn insert(&self, table: &str, data: Fields) -> Result<i64, DbError> {
        self.insert_on(None, table, data).await
    }

    /// Update rows matching `conditions`; an empty predicate is refused.
    pub async fn update(&self, table: &str, data: Fields, conditions: &Conditions) -> Result<u64, DbError> {
        self.update_on(None, table, data, conditions).await
    }

    /// Delete rows matching `conditions`; an empty predicate is refused.
    pub async fn delete(&self, table: &str, conditions: &Conditions) -> Result<u64, DbError> {
        self.delete_on(None, table, conditions).await
    }

    pub async fn find(&self, table: &str, id: i64) -> Result<Option<Row>, DbError> {
        self.find_where(table, &Conditions::new().eq("id", id)).await
    }

    pub async fn find_where(&self, table: &str, conditions: &Conditions) -> Result<Option<Row>, DbError> {
        self.find_where_on(None, table, conditions).await
    }

    pub async fn find_all(
        &self,
        table: &str,
        conditions: &Conditions,
        options: &FindOptions,
    ) -> Result<Vec<Row>, DbError> {
        self.find_all_on(None, table, conditions, options).await
    }

    pub async fn exists(&self, table: &str, conditions: &Conditions) -> Result<bool, DbError> {
        self.exists_on(None, table, conditions).await
    }

    pub async fn count(&self, table: &str, conditions: &Conditions) -> Result<i64, DbError> {
        self.count_on(None, table, conditions).await
    }

    /// One page of rows plus the total across all pages.
    pub async fn paginate(
        &self,
        table: &str,
        conditions: &Conditions,
        order_by: &[OrderBy],
        page: Pagination,
    ) -> Result<Paginated<Row>, DbError> {
        let total = self.count(table, conditions).await?;
        let mut options = FindOptions::new().limit(page.limit() as u64).offset(page.offset());
        options.order_by = order_by.to_vec();
        let items = self.find_all(table, conditions, &options).await?;

        Ok(Paginated {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction on the primary connection.
    ///
    /// The returned guard holds the primary lease until its outermost level
    /// is committed or rolled back; statements from other callers wait for
    /// it (reads may still go to a replica). Nested levels are savepoints
    /// opened through [`Transaction::begin_transaction`].
    pub async fn begin_transaction(&self) -> Result<Transaction<'_>, DbError> {
        Transaction::open(self).await
    }

    /// Levels open on the primary connection, across all callers.
    pub fn transaction_depth(&self) -> usize {
        self.inner.manager.transaction_depth()
    }

    // ------------------------------------------------------------------
    // Statements on an optional pinned handle
    // ------------------------------------------------------------------

    pub(super) async fn execute_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, DbError> {
        let result = self.write(conn, sql, params).await;
        self.invalidate_tables(sql);
        Ok(result?.rows_affected)
    }

    pub(super) async fn query_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, DbError> {
        let rows = self.read(conn, "all", sql, params, None, &[]).await?;
        Ok(unshare(rows))
    }

    pub(super) async fn fetch_one_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
    ) -> Result<Option<Row>, DbError> {
        let rows = self.read(conn, "one", sql, params, ttl, &[]).await?;
        Ok(rows.first().cloned())
    }

    pub(super) async fn insert_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        data: Fields,
    ) -> Result<i64, DbError> {
        let table = identifier(table)?;
        let mut data = strip_protected(table, data);
        let now = self.now();
        data.insert("created_at".to_string(), Value::Text(now.clone()));
        data.insert("updated_at".to_string(), Value::Text(now));

        let mut columns = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len());
        for (column, value) in data {
            identifier(&column)?;
            columns.push(column);
            params.push(value);
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let result = if self.dialect().uses_returning() {
            sql.push_str(" RETURNING id");
            self.write_returning(conn, &sql, &params).await.and_then(|rows| {
                rows.first()
                    .ok_or_else(|| DbError::Decode {
                        column: "id".to_string(),
                        reason: "insert returned no row".to_string(),
                    })?
                    .i64("id")
            })
        } else {
            self.write(conn, &sql, &params).await.and_then(|r| {
                r.last_insert_id.ok_or_else(|| DbError::Decode {
                    column: "id".to_string(),
                    reason: "driver reported no insert id".to_string(),
                })
            })
        };

        self.inner.cache.invalidate_tag(table);
        result
    }

    pub(super) async fn update_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        data: Fields,
        conditions: &Conditions,
    ) -> Result<u64, DbError> {
        if conditions.is_empty() {
            return Err(DbError::invalid(format!(
                "refusing to update every row of '{}' without conditions",
                table
            )));
        }
        let table = identifier(table)?;
        let mut data = strip_protected(table, data);
        data.insert("updated_at".to_string(), Value::Text(self.now()));

        let mut assignments = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len() + conditions.len());
        for (column, value) in data {
            assignments.push(format!("{} = ?", identifier(&column)?));
            params.push(value);
        }

        let (where_sql, where_params) = conditions.where_clause()?;
        params.extend(where_params);
        let sql = format!("UPDATE {} SET {}{}", table, assignments.join(", "), where_sql);

        let result = self.write(conn, &sql, &params).await;
        self.inner.cache.invalidate_tag(table);
        Ok(result?.rows_affected)
    }

    pub(super) async fn delete_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        conditions: &Conditions,
    ) -> Result<u64, DbError> {
        if conditions.is_empty() {
            return Err(DbError::invalid(format!(
                "refusing to delete every row of '{}' without conditions",
                table
            )));
        }
        let table = identifier(table)?;
        let (where_sql, params) = conditions.where_clause()?;
        let sql = format!("DELETE FROM {}{}", table, where_sql);

        let result = self.write(conn, &sql, &params).await;
        self.inner.cache.invalidate_tag(table);
        Ok(result?.rows_affected)
    }

    pub(super) async fn find_where_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        conditions: &Conditions,
    ) -> Result<Option<Row>, DbError> {
        let table = identifier(table)?;
        let (where_sql, params) = conditions.where_clause()?;
        let sql = format!("SELECT * FROM {}{} LIMIT 1", table, where_sql);
        self.fetch_one_on(conn, &sql, &params, None).await
    }

    pub(super) async fn find_all_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        conditions: &Conditions,
        options: &FindOptions,
    ) -> Result<Vec<Row>, DbError> {
        let table = identifier(table)?;
        let (where_sql, params) = conditions.where_clause()?;
        let mut sql = format!("SELECT * FROM {}{}", table, where_sql);

        if !options.order_by.is_empty() {
            let order = options
                .order_by
                .iter()
                .map(OrderBy::to_sql)
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        match (options.limit, options.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // MySQL and SQLite need a LIMIT before OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", i64::MAX, offset)),
            (None, None) => {}
        }

        let rows = self.read(conn, "all", &sql, &params, options.ttl, &[]).await?;
        Ok(unshare(rows))
    }

    pub(super) async fn exists_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        conditions: &Conditions,
    ) -> Result<bool, DbError> {
        let table = identifier(table)?;
        let (where_sql, params) = conditions.where_clause()?;
        let sql = format!("SELECT 1 AS present FROM {}{} LIMIT 1", table, where_sql);
        Ok(self.fetch_one_on(conn, &sql, &params, None).await?.is_some())
    }

    pub(super) async fn count_on(
        &self,
        conn: Option<&mut ConnectionHandle>,
        table: &str,
        conditions: &Conditions,
    ) -> Result<i64, DbError> {
        let table = identifier(table)?;
        let (where_sql, params) = conditions.where_clause()?;
        let sql = format!("SELECT COUNT(*) AS total FROM {}{}", table, where_sql);
        match self.fetch_one_on(conn, &sql, &params, None).await? {
            Some(row) => row.i64("total"),
            None => Ok(0),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn health_metrics(&self) -> HealthMetrics {
        let config = self.inner.manager.config();
        HealthMetrics {
            environment: self.environment(),
            driver: config.driver,
            connection: self.inner.manager.snapshot(),
            cache: self.inner.cache.counters(),
            tracked_statements: self.inner.stats.len(),
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let config = self.inner.manager.config();
        let snapshot = self.inner.manager.snapshot();
        let host = snapshot.current_host.as_deref().unwrap_or(&config.host);

        ConnectionStatus {
            environment: self.environment(),
            driver: config.driver,
            connected: snapshot.connected,
            target: config.describe(host),
            current_host: snapshot.current_host.clone(),
            replica_active: snapshot.replica_active,
            in_transaction: snapshot.transaction_depth > 0,
            last_connected_at: snapshot.last_connected_at,
            last_health_check_at: snapshot.last_health_check_at,
        }
    }

    /// Liveness probe through the manager.
    pub async fn health_check(&self) -> bool {
        self.inner.manager.health_check().await
    }

    pub async fn close(&self) {
        self.inner.manager.close().await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Reads on a pinned handle belong to a transaction: they bypass the
    /// cache entirely.
    async fn read(
        &self,
        conn: Option<&mut ConnectionHandle>,
        kind: &str,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
        extra_tags: &[&str],
    ) -> Result<Arc<Vec<Row>>, DbError> {
        reject_empty(sql)?;

        if let Some(handle) = conn {
            let started = Instant::now();
            let result = handle.session().fetch(sql, params).await;
            return Ok(Arc::new(self.finish(sql, params, started, result)?));
        }

        let cache = &self.inner.cache;
        let key = ttl.map(|_| Fingerprint::result(kind, sql, params));

        if let Some(key) = &key {
            if let Some(rows) = cache.get(key) {
                tracing::trace!(fingerprint = %key, "cache hit");
                return Ok(rows);
            }
        }

        let observed = cache.generation();
        let rows = {
            let mut lease = self.inner.manager.read_connection().await?;
            let started = Instant::now();
            let result = lease.session().fetch(sql, params).await;
            drop(lease);
            Arc::new(self.finish(sql, params, started, result)?)
        };

        if let (Some(key), Some(ttl)) = (key, ttl) {
            let mut tags: BTreeSet<String> = referenced_tables(sql);
            tags.extend(extra_tags.iter().map(|t| t.to_ascii_lowercase()));
            cache.put(key, Arc::clone(&rows), ttl, tags, observed);
        }
        Ok(rows)
    }

    async fn write(
        &self,
        conn: Option<&mut ConnectionHandle>,
        sql: &str,
        params: &[Value],
    ) -> Result<ExecResult, DbError> {
        reject_empty(sql)?;
        let mut lease;
        let handle = match conn {
            Some(handle) => handle,
            None => {
                lease = self.inner.manager.connect(false).await?;
                &mut *lease
            }
        };
        let started = Instant::now();
        let result = handle.session().execute(sql, params).await;
        self.finish(sql, params, started, result)
    }

    async fn write_returning(
        &self,
        conn: Option<&mut ConnectionHandle>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, DbError> {
        let mut lease;
        let handle = match conn {
            Some(handle) => handle,
            None => {
                lease = self.inner.manager.connect(false).await?;
                &mut *lease
            }
        };
        let started = Instant::now();
        let result = handle.session().fetch(sql, params).await;
        self.finish(sql, params, started, result)
    }

    /// Unprepared statement on a handle the caller already holds.
    pub(super) async fn script(&self, handle: &mut ConnectionHandle, sql: &str) -> Result<(), DbError> {
        let started = Instant::now();
        let result = handle.session().run_script(sql).await;
        self.finish(sql, &[], started, result)
    }

    pub(super) fn invalidate_tables(&self, sql: &str) {
        for table in referenced_tables(sql) {
            self.inner.cache.invalidate_tag(&table);
        }
    }

    fn finish<T>(
        &self,
        sql: &str,
        params: &[Value],
        started: Instant,
        result: Result<T, DriverError>,
    ) -> Result<T, DbError> {
        let elapsed = started.elapsed();
        match result {
            Ok(value) => {
                self.inner.stats.record(sql, elapsed, None);
                if elapsed >= self.inner.slow_query_threshold {
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        sql = %normalize_sql(sql),
                        "slow query"
                    );
                }
                Ok(value)
            }
            Err(e) => {
                self.inner.stats.record(sql, elapsed, Some(&e.message));
                Err(self.query_error(sql, params, elapsed, e))
            }
        }
    }

    fn query_error(&self, sql: &str, params: &[Value], elapsed: Duration, e: DriverError) -> DbError {
        let correlation_id = Uuid::new_v4();

        if self.environment().exposes_internals() {
            let sql = normalize_sql(sql);
            let rendered = params.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            tracing::error!(
                %correlation_id,
                sql = %sql,
                param_count = params.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "query failed"
            );
            DbError::Query {
                message: format!("{} [sql: {}] [params: {}]", e, sql, rendered),
                correlation_id,
            }
        } else {
            tracing::error!(%correlation_id, "query failed");
            DbError::Query {
                message: "operation failed".to_string(),
                correlation_id,
            }
        }
    }
}

fn reject_empty(sql: &str) -> Result<(), DbError> {
    if sql.trim().is_empty() {
        Err(DbError::invalid("empty SQL statement"))
    } else {
        Ok(())
    }
}

fn strip_protected(table: &str, mut data: Fields) -> Fields {
    for field in PROTECTED_FIELDS {
        if data.remove(*field).is_some() {
            tracing::debug!(table, field, "ignoring protected field in caller data");
        }
    }
    data
}

fn unshare(rows: Arc<Vec<Row>>) -> Vec<Row> {
    Arc::try_unwrap(rows).unwrap_or_else(|shared| (*shared).clone())
}
