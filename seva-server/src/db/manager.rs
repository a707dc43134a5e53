//! Connection Manager - one shared primary handle plus an optional read replica
//!
//! Policy:
//! - A cached handle is reused without a round-trip until the health-check
//!   interval elapses; then one liveness probe decides keep or replace.
//! - A full connect tries the primary `retries` times with exponential backoff
//!   and jitter, then each failover host once, in order.
//! - After `max_reconnect_attempts` consecutive exhausted cycles the manager
//!   fails fast until one health-check interval has passed.
//! - An open [`Transaction`](super::Transaction) holds the primary lease, so
//!   nobody else checks or replaces its handle; `connect(true)` meanwhile is
//!   refused. A handle left behind with an open transaction is rolled back
//!   before anyone reuses it.
//!
//! Configuration is never mutated; failover only changes the dialled target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use seva_core::{ConnectionConfig, Environment};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use super::connector::{ConnectTarget, Connector, DriverError, FailureKind, Session, TargetRole};
use super::error::DbError;
use super::sql::Dialect;
use super::transaction::TransactionState;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Upper bound for the random jitter added to each backoff sleep.
const MAX_JITTER_MS: u64 = 1_000;

/// Backoff before the next attempt, after `attempt` (1-based) failed:
/// `min(2^attempt s + jitter, 10 s)` with jitter in `[0, 1 s]`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(2u64.saturating_pow(attempt));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
    base.saturating_add(jitter).min(MAX_BACKOFF)
}

/// One live connection owned by the manager.
pub struct ConnectionHandle {
    session: Box<dyn Session>,
    target: ConnectTarget,
    connected_at: DateTime<Utc>,
    last_checked: Instant,
    pub(crate) tx: TransactionState,
}

impl ConnectionHandle {
    fn new(session: Box<dyn Session>, target: ConnectTarget) -> Self {
        Self {
            session,
            target,
            connected_at: Utc::now(),
            last_checked: Instant::now(),
            tx: TransactionState::default(),
        }
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    pub fn role(&self) -> TargetRole {
        self.target.role
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn dialect(&self) -> Dialect {
        self.session.dialect()
    }

    pub fn transaction_depth(&self) -> usize {
        self.tx.depth()
    }
}

/// Exclusive access to a handle for the duration of one call.
pub type Lease<'a> = MappedMutexGuard<'a, ConnectionHandle>;

/// Point-in-time view of connection activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub current_host: Option<String>,
    pub current_role: Option<TargetRole>,
    pub replica_active: bool,
    pub replica_host: Option<String>,
    pub connection_attempts: u64,
    pub failed_attempts: u64,
    pub reconnect_cycles: u64,
    pub consecutive_failures: u32,
    pub failovers: u64,
    pub health_probes: u64,
    pub failed_probes: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub transaction_depth: usize,
}

#[derive(Default)]
struct Counters {
    snapshot: ConnectionSnapshot,
    last_failure: Option<Instant>,
}

enum Reuse {
    Keep,
    Probe,
    Replace,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    environment: Environment,
    connector: Arc<dyn Connector>,
    primary: Mutex<Option<ConnectionHandle>>,
    replica: Mutex<Option<ConnectionHandle>>,
    tx_depth: AtomicUsize,
    counters: std::sync::Mutex<Counters>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, environment: Environment, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            environment,
            connector,
            primary: Mutex::new(None),
            replica: Mutex::new(None),
            tx_depth: AtomicUsize::new(0),
            counters: std::sync::Mutex::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn dialect(&self) -> Dialect {
        self.connector.dialect()
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Failover and replicas only make sense for networked drivers.
    fn failover_hosts(&self) -> &[String] {
        if self.config.driver.is_networked() {
            &self.config.failover_hosts
        } else {
            &[]
        }
    }

    fn replica_host(&self) -> Option<&str> {
        self.config
            .read_host
            .as_deref()
            .filter(|_| self.config.driver.is_networked())
    }

    /// A healthy primary handle.
    pub async fn connect(&self, force_new: bool) -> Result<Lease<'_>, DbError> {
        if force_new && self.in_transaction() {
            return Err(DbError::invalid(
                "cannot replace the connection while a transaction is open",
            ));
        }

        let mut slot = self.primary.lock().await;
        self.roll_back_abandoned(&mut slot).await;
        let interval = self.config.health_check_interval;

        let mut decision = match slot.as_ref() {
            None => Reuse::Replace,
            Some(_) if force_new => Reuse::Replace,
            Some(handle) if handle.last_checked.elapsed() < interval => Reuse::Keep,
            Some(_) => Reuse::Probe,
        };

        if let Reuse::Probe = decision {
            let healthy = match slot.as_mut() {
                Some(handle) => self.probe(handle).await,
                None => false,
            };
            decision = if healthy { Reuse::Keep } else { Reuse::Replace };
        }

        if let Reuse::Replace = decision {
            if let Some(old) = slot.take() {
                self.forget_primary();
                old.session.close().await;
            }
            let handle = self.establish().await?;
            *slot = Some(handle);
        }

        lease(slot)
    }

    /// A handle for reads: the replica when one is configured and reachable,
    /// otherwise the primary.
    pub async fn read_connection(&self) -> Result<Lease<'_>, DbError> {
        let Some(host) = self.replica_host() else {
            return self.connect(false).await;
        };

        let mut slot = self.replica.lock().await;
        let interval = self.config.health_check_interval;

        let stale = match slot.as_mut() {
            Some(handle) if handle.last_checked.elapsed() < interval => false,
            Some(handle) => !self.probe(handle).await,
            None => true,
        };

        if stale {
            if let Some(old) = slot.take() {
                self.set_replica(None);
                old.session.close().await;
            }

            let target = ConnectTarget::new(host, TargetRole::Replica);
            self.counters().snapshot.connection_attempts += 1;
            match self.connector.connect(&target).await {
                Ok(session) => {
                    tracing::info!(host = %host, "read replica connected");
                    self.set_replica(Some(host.to_string()));
                    *slot = Some(ConnectionHandle::new(session, target));
                }
                Err(e) => {
                    self.counters().snapshot.failed_attempts += 1;
                    tracing::warn!(host = %host, error = %e, "read replica unavailable, using primary");
                    drop(slot);
                    return self.connect(false).await;
                }
            }
        }

        lease(slot)
    }

    /// Check the primary now. A failed ping drops the handle so the next
    /// `connect` performs a full reconnect. With nothing cached, makes a
    /// single connection attempt to the primary without retries, backoff
    /// or failover.
    pub async fn health_check(&self) -> bool {
        let mut slot = self.primary.lock().await;
        self.roll_back_abandoned(&mut slot).await;

        if slot.is_none() {
            let target = ConnectTarget::new(self.config.host.clone(), TargetRole::Primary);
            return match self.attempt(&target, 1).await {
                Ok(session) => {
                    *slot = Some(self.connected(session, target));
                    true
                }
                Err(_) => false,
            };
        }

        let healthy = match slot.as_mut() {
            Some(handle) => self.probe(handle).await,
            None => false,
        };
        if !healthy {
            if let Some(old) = slot.take() {
                self.forget_primary();
                old.session.close().await;
            }
        }
        healthy
    }

    /// Release both handles. Safe to call repeatedly.
    pub async fn close(&self) {
        let primary = self.primary.lock().await.take();
        let replica = self.replica.lock().await.take();

        if let Some(handle) = primary {
            tracing::info!(host = %handle.host(), "closing primary connection");
            handle.session.close().await;
        }
        if let Some(handle) = replica {
            handle.session.close().await;
        }

        self.tx_depth.store(0, Ordering::SeqCst);
        self.forget_primary();
        self.set_replica(None);
    }

    pub fn transaction_depth(&self) -> usize {
        self.tx_depth.load(Ordering::SeqCst)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    pub(crate) fn set_transaction_depth(&self, depth: usize) {
        self.tx_depth.store(depth, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let mut snapshot = self.counters().snapshot.clone();
        snapshot.transaction_depth = self.transaction_depth();
        snapshot
    }

    /// Roll back a transaction whose guard was dropped without ending it.
    /// A handle that cannot roll back is closed.
    async fn roll_back_abandoned(&self, slot: &mut Option<ConnectionHandle>) {
        let Some(handle) = slot.as_mut().filter(|h| h.tx.is_active()) else {
            return;
        };
        tracing::warn!(
            host = %handle.host(),
            depth = handle.tx.depth(),
            "rolling back abandoned transaction"
        );
        let outcome = handle.session.run_script("ROLLBACK").await;
        handle.tx = TransactionState::default();
        self.tx_depth.store(0, Ordering::SeqCst);

        if let Err(e) = outcome {
            tracing::error!(host = %handle.host(), error = %e, "rollback failed, dropping connection");
            if let Some(old) = slot.take() {
                self.forget_primary();
                old.session.close().await;
            }
        }
    }

    async fn probe(&self, handle: &mut ConnectionHandle) -> bool {
        self.counters().snapshot.health_probes += 1;
        match handle.session.ping().await {
            Ok(()) => {
                handle.last_checked = Instant::now();
                self.counters().snapshot.last_health_check_at = Some(Utc::now());
                true
            }
            Err(e) => {
                self.counters().snapshot.failed_probes += 1;
                tracing::warn!(host = %handle.host(), error = %e, "liveness probe failed");
                false
            }
        }
    }

    /// Full connect: primary with retries, then failover hosts.
    async fn establish(&self) -> Result<ConnectionHandle, DbError> {
        self.check_cooldown()?;
        self.counters().snapshot.reconnect_cycles += 1;

        let retries = self.config.retries.max(1);
        let primary = ConnectTarget::new(self.config.host.clone(), TargetRole::Primary);
        let mut last_error: Option<DriverError> = None;

        for attempt in 1..=retries {
            match self.attempt(&primary, attempt).await {
                Ok(session) => return Ok(self.connected(session, primary)),
                Err(e) => last_error = Some(e),
            }
            if attempt < retries {
                let delay = backoff_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before reconnect");
                tokio::time::sleep(delay).await;
            }
        }

        for host in self.failover_hosts() {
            let target = ConnectTarget::new(host.clone(), TargetRole::Failover);
            match self.attempt(&target, 1).await {
                Ok(session) => {
                    tracing::warn!(
                        primary = %self.config.host,
                        failover = %host,
                        "primary exhausted, connected to failover host"
                    );
                    self.counters().snapshot.failovers += 1;
                    return Ok(self.connected(session, target));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(self.exhausted(retries, last_error))
    }

    async fn attempt(&self, target: &ConnectTarget, attempt: u32) -> Result<Box<dyn Session>, DriverError> {
        self.counters().snapshot.connection_attempts += 1;
        let started = Instant::now();

        match self.connector.connect(target).await {
            Ok(session) => Ok(session),
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                {
                    let mut counters = self.counters();
                    counters.snapshot.failed_attempts += 1;
                    counters.snapshot.last_error = Some(e.message.clone());
                }
                match e.kind {
                    FailureKind::Auth => tracing::error!(
                        target: "seva::security",
                        host = %target.host,
                        attempt,
                        elapsed_ms,
                        error = %e,
                        "database authentication failed"
                    ),
                    FailureKind::Network | FailureKind::Other => tracing::warn!(
                        host = %target.host,
                        attempt,
                        elapsed_ms,
                        error = %e,
                        "database connection attempt failed"
                    ),
                }
                Err(e)
            }
        }
    }

    fn connected(&self, session: Box<dyn Session>, target: ConnectTarget) -> ConnectionHandle {
        tracing::info!(
            host = %target.host,
            role = ?target.role,
            database = %self.config.database,
            "database connected"
        );
        let mut counters = self.counters();
        counters.snapshot.connected = true;
        counters.snapshot.current_host = Some(target.host.clone());
        counters.snapshot.current_role = Some(target.role);
        counters.snapshot.consecutive_failures = 0;
        counters.snapshot.last_connected_at = Some(Utc::now());
        counters.snapshot.last_health_check_at = Some(Utc::now());
        counters.last_failure = None;
        ConnectionHandle::new(session, target)
    }

    fn check_cooldown(&self) -> Result<(), DbError> {
        let counters = self.counters();
        let budget_spent = counters.snapshot.consecutive_failures >= self.config.max_reconnect_attempts;
        let cooling = counters
            .last_failure
            .is_some_and(|at| at.elapsed() < self.config.health_check_interval);
        if budget_spent && cooling {
            drop(counters);
            let correlation_id = Uuid::new_v4();
            tracing::warn!(
                %correlation_id,
                failures = self.config.max_reconnect_attempts,
                "reconnect budget exhausted, failing fast"
            );
            return Err(DbError::Connection {
                message: self.gated(|| {
                    format!(
                        "reconnect budget exhausted after {} consecutive failed cycles; retrying after {}s",
                        self.config.max_reconnect_attempts,
                        self.config.health_check_interval.as_secs()
                    )
                }),
                correlation_id,
            });
        }
        Ok(())
    }

    fn exhausted(&self, retries: u32, last_error: Option<DriverError>) -> DbError {
        {
            let mut counters = self.counters();
            counters.snapshot.consecutive_failures += 1;
            counters.snapshot.connected = false;
            counters.snapshot.current_host = None;
            counters.snapshot.current_role = None;
            counters.last_failure = Some(Instant::now());
        }

        let correlation_id = Uuid::new_v4();
        let cause = last_error.map(|e| e.message).unwrap_or_default();
        let detail = format!(
            "could not connect to {} after {} attempt(s) and {} failover host(s): {}",
            self.config.describe(&self.config.host),
            retries,
            self.failover_hosts().len(),
            cause
        );
        tracing::error!(%correlation_id, "{}", detail);

        DbError::Connection {
            message: self.gated(|| detail.clone()),
            correlation_id,
        }
    }

    /// Detailed text outside production, an opaque one inside it.
    fn gated(&self, detail: impl FnOnce() -> String) -> String {
        if self.environment.exposes_internals() {
            detail()
        } else {
            "database service unavailable".to_string()
        }
    }

    fn forget_primary(&self) {
        let mut counters = self.counters();
        counters.snapshot.connected = false;
        counters.snapshot.current_host = None;
        counters.snapshot.current_role = None;
    }

    fn set_replica(&self, host: Option<String>) {
        let mut counters = self.counters();
        counters.snapshot.replica_active = host.is_some();
        counters.snapshot.replica_host = host;
    }
}

fn lease(slot: MutexGuard<'_, Option<ConnectionHandle>>) -> Result<Lease<'_>, DbError> {
    MutexGuard::try_map(slot, Option::as_mut)
        .map_err(|_| DbError::invalid("connection slot emptied while leased"))
}
