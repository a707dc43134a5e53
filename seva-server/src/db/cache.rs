//! Read-result cache with TTL expiry and dependency-tag invalidation
//!
//! Entries are tagged with the tables they read. A write invalidates its tables'
//! tags, which bumps a per-tag epoch. A read that began before that epoch
//! cannot store its (possibly stale) result afterwards, so a read started after
//! a write's invalidation never observes pre-write data.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::sql::normalize_sql;
use super::value::{Row, Value};

/// md5 hex digest identifying a statement or a statement-plus-parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Key for cached results: kind, normalized SQL and typed parameters.
    pub fn result(kind: &str, sql: &str, params: &[Value]) -> Self {
        let mut material = String::with_capacity(sql.len() + 16 * params.len() + 8);
        material.push_str(kind);
        material.push('|');
        material.push_str(&normalize_sql(sql));
        material.push('|');
        for param in params {
            param.fingerprint_into(&mut material);
        }
        Self(format!("{:x}", md5::compute(material.as_bytes())))
    }

    /// Key for statement statistics: normalized SQL only.
    pub fn statement(sql: &str) -> Self {
        Self(format!("{:x}", md5::compute(normalize_sql(sql).as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheCounters {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Cache capability used by the data-access base.
pub trait ResultCache: Send + Sync {
    /// Live entry for `key`. Expired entries are evicted here and nowhere else.
    fn get(&self, key: &Fingerprint) -> Option<Arc<Vec<Row>>>;

    /// Store unless one of `tags` was invalidated after `observed_generation`.
    /// Returns whether the entry was stored.
    fn put(
        &self,
        key: Fingerprint,
        rows: Arc<Vec<Row>>,
        ttl: Duration,
        tags: BTreeSet<String>,
        observed_generation: u64,
    ) -> bool;

    /// Invalidation counter; capture before executing a read.
    fn generation(&self) -> u64;

    /// Drop every entry carrying `tag`; returns how many were dropped.
    fn invalidate_tag(&self, tag: &str) -> usize;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn counters(&self) -> CacheCounters;
}

struct Entry {
    rows: Arc<Vec<Row>>,
    expires_at: Instant,
    tags: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Fingerprint, Entry>,
    tag_epochs: HashMap<String, u64>,
    cleared_at: u64,
    generation: u64,
}

/// In-memory [`ResultCache`]. No background sweeping.
#[derive(Default)]
pub struct TtlCache {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-update leaves at worst a missing entry, never a torn one
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultCache for TtlCache {
    fn get(&self, key: &Fingerprint) -> Option<Arc<Vec<Row>>> {
        let mut inner = self.lock();
        let now = Instant::now();

        let live = match inner.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(Arc::clone(&entry.rows)),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };

        match &live {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        live
    }

    fn put(
        &self,
        key: Fingerprint,
        rows: Arc<Vec<Row>>,
        ttl: Duration,
        tags: BTreeSet<String>,
        observed_generation: u64,
    ) -> bool {
        let mut inner = self.lock();

        let stale = inner.cleared_at > observed_generation
            || tags
                .iter()
                .any(|t| inner.tag_epochs.get(t).is_some_and(|&e| e > observed_generation));
        if stale {
            tracing::debug!(fingerprint = %key, "discarding result raced by invalidation");
            return false;
        }

        inner.entries.insert(
            key,
            Entry {
                rows,
                expires_at: Instant::now() + ttl,
                tags,
            },
        );
        true
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn invalidate_tag(&self, tag: &str) -> usize {
        let tag = tag.to_ascii_lowercase();
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        inner.tag_epochs.insert(tag.clone(), generation);

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.tags.contains(&tag));
        before - inner.entries.len()
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.cleared_at = inner.generation;
        inner.entries.clear();
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn counters(&self) -> CacheCounters {
        CacheCounters {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
