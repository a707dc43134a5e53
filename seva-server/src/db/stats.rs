//! Per-statement execution statistics (observability only)

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use super::cache::Fingerprint;
use super::sql::normalize_sql;

/// Aggregates for one distinct statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStat {
    pub fingerprint: Fingerprint,
    pub sql: String,
    pub count: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_error: Option<String>,
}

impl QueryStat {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryStats {
    entries: Mutex<HashMap<Fingerprint, QueryStat>>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, QueryStat>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, sql: &str, elapsed: Duration, error: Option<&str>) {
        let fingerprint = Fingerprint::statement(sql);
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut entries = self.lock();

        let stat = entries.entry(fingerprint.clone()).or_insert_with(|| QueryStat {
            fingerprint,
            sql: normalize_sql(sql),
            count: 0,
            successes: 0,
            errors: 0,
            total_ms: 0.0,
            min_ms: f64::MAX,
            max_ms: 0.0,
            last_error: None,
        });

        stat.count += 1;
        stat.total_ms += ms;
        stat.min_ms = stat.min_ms.min(ms);
        stat.max_ms = stat.max_ms.max(ms);
        match error {
            None => stat.successes += 1,
            Some(message) => {
                stat.errors += 1;
                stat.last_error = Some(message.to_string());
            }
        }
    }

    pub fn get(&self, sql: &str) -> Option<QueryStat> {
        self.lock().get(&Fingerprint::statement(sql)).cloned()
    }

    /// All statements, most executed first.
    pub fn snapshot(&self) -> Vec<QueryStat> {
        let mut stats: Vec<QueryStat> = self.lock().values().cloned().collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.sql.cmp(&b.sql)));
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_per_statement() {
        let stats = QueryStats::new();
        stats.record("SELECT * FROM users", Duration::from_millis(10), None);
        stats.record("SELECT *   FROM users", Duration::from_millis(30), None);
        stats.record("SELECT * FROM users", Duration::from_millis(20), Some("boom"));

        let stat = stats.get("SELECT * FROM users").unwrap();
        assert_eq!(stat.count, 3);
        assert_eq!(stat.successes, 2);
        assert_eq!(stat.errors, 1);
        assert_eq!(stat.last_error.as_deref(), Some("boom"));
        assert!((stat.min_ms - 10.0).abs() < 1e-6);
        assert!((stat.max_ms - 30.0).abs() < 1e-6);
        assert!((stat.avg_ms() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = QueryStats::new();
        stats.record("SELECT 1", Duration::ZERO, None);
        stats.record("SELECT 2", Duration::ZERO, None);
        stats.record("SELECT 2", Duration::ZERO, None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot[0].sql, "SELECT 2");
        assert_eq!(stats.len(), 2);

        stats.reset();
        assert!(stats.is_empty());
    }
}
