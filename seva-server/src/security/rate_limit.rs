//! Sliding-window rate limiting backed by a JSON ledger on disk
//!
//! The ledger maps a client address to the unix timestamps of its recent
//! attempts. Every check prunes entries older than the window and writes the
//! ledger back, so limits survive restarts.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;

use super::SecurityError;

type Ledger = BTreeMap<String, Vec<i64>>;

pub struct RateLimitLedger {
    path: PathBuf,
    max_attempts: u32,
    window: Duration,
    /// Loaded on first use.
    entries: Mutex<Option<Ledger>>,
}

impl RateLimitLedger {
    pub fn new(path: impl Into<PathBuf>, max_attempts: u32, window: Duration) -> Self {
        Self {
            path: path.into(),
            max_attempts,
            window,
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an attempt from `ip` at the current time.
    pub async fn check(&self, ip: IpAddr) -> Result<(), SecurityError> {
        self.check_at(ip, chrono::Utc::now().timestamp()).await
    }

    /// Record an attempt at `now` (unix seconds). A client already at the
    /// limit is refused and the refused attempt is not counted.
    pub async fn check_at(&self, ip: IpAddr, now: i64) -> Result<(), SecurityError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let ledger = guard.get_or_insert_with(Ledger::new);

        let window = self.window.as_secs() as i64;
        let cutoff = now - window;
        ledger.retain(|_, stamps| {
            stamps.retain(|&t| t > cutoff);
            !stamps.is_empty()
        });

        let key = ip.to_string();
        let stamps = ledger.entry(key).or_default();
        let outcome = if stamps.len() >= self.max_attempts as usize {
            let oldest = stamps.iter().copied().min().unwrap_or(now);
            Err(SecurityError::RateLimited {
                ip,
                retry_after: (oldest + window - now).max(1) as u64,
            })
        } else {
            stamps.push(now);
            Ok(())
        };
        if stamps.is_empty() {
            ledger.remove(&ip.to_string());
        }

        self.persist(ledger).await?;
        outcome
    }

    /// Attempts currently counted against `ip`.
    pub async fn attempts(&self, ip: IpAddr) -> usize {
        self.entries
            .lock()
            .await
            .as_ref()
            .and_then(|l| l.get(&ip.to_string()))
            .map_or(0, Vec::len)
    }

    async fn load(&self) -> Result<Ledger, SecurityError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(
                    target: "seva::security",
                    path = %self.path.display(),
                    error = %e,
                    "rate-limit ledger unreadable, starting empty"
                );
                Ledger::new()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ledger::new()),
            Err(source) => Err(self.ledger_error(source)),
        }
    }

    async fn persist(&self, ledger: &Ledger) -> Result<(), SecurityError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.ledger_error(e))?;
        }
        let body = serde_json::to_vec(ledger).map_err(|e| self.ledger_error(e.into()))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| self.ledger_error(e))
    }

    fn ledger_error(&self, source: std::io::Error) -> SecurityError {
        SecurityError::Ledger {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client() -> IpAddr {
        "192.0.2.10".parse().unwrap()
    }

    #[tokio::test]
    async fn refuses_at_the_limit_and_recovers_after_the_window() {
        let dir = TempDir::new().unwrap();
        let ledger = RateLimitLedger::new(dir.path().join("rl.json"), 3, Duration::from_secs(60));

        for t in 0..3 {
            ledger.check_at(client(), 1_000 + t).await.unwrap();
        }
        let err = ledger.check_at(client(), 1_010).await.unwrap_err();
        assert!(matches!(err, SecurityError::RateLimited { retry_after: 50, .. }));
        assert_eq!(ledger.attempts(client()).await, 3);

        // first stamp (1000) falls out of the window at 1060
        ledger.check_at(client(), 1_060).await.unwrap();
    }

    #[tokio::test]
    async fn clients_are_counted_separately() {
        let dir = TempDir::new().unwrap();
        let ledger = RateLimitLedger::new(dir.path().join("rl.json"), 1, Duration::from_secs(60));
        let other: IpAddr = "198.51.100.7".parse().unwrap();

        ledger.check_at(client(), 10).await.unwrap();
        ledger.check_at(other, 10).await.unwrap();
        assert!(ledger.check_at(client(), 11).await.is_err());
    }

    #[tokio::test]
    async fn ledger_survives_restart_and_is_pruned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("rl.json");

        let first = RateLimitLedger::new(&path, 2, Duration::from_secs(60));
        first.check_at(client(), 100).await.unwrap();
        first.check_at(client(), 101).await.unwrap();

        let second = RateLimitLedger::new(&path, 2, Duration::from_secs(60));
        assert!(second.check_at(client(), 120).await.is_err());

        // much later: old stamps pruned from the file
        second.check_at(client(), 1_000).await.unwrap();
        let on_disk: Ledger = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.get("192.0.2.10"), Some(&vec![1_000]));
    }

    #[tokio::test]
    async fn corrupt_ledger_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rl.json");
        std::fs::write(&path, "not json").unwrap();

        let ledger = RateLimitLedger::new(&path, 5, Duration::from_secs(60));
        ledger.check_at(client(), 5).await.unwrap();
        assert_eq!(ledger.attempts(client()).await, 1);
    }
}
