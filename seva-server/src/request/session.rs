//! In-memory sessions keyed by an opaque cookie value

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::csrf::{random_token, CsrfToken};
use super::flash::{Flash, FlashQueue};

pub const SESSION_COOKIE: &str = "seva_session";

pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
struct SessionData {
    last_seen: Instant,
    csrf: Option<CsrfToken>,
    flashes: FlashQueue,
}

impl SessionData {
    fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            csrf: None,
            flashes: FlashQueue::default(),
        }
    }
}

pub struct SessionStore {
    idle_ttl: Duration,
    sessions: Mutex<HashMap<String, SessionData>>,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionData>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resume a live session or start a new one. Returns the id and whether
    /// it was newly created.
    pub fn open(&self, id: Option<&str>) -> (String, bool) {
        let mut sessions = self.lock();
        if let Some(id) = id {
            match sessions.get_mut(id) {
                Some(data) if data.last_seen.elapsed() < self.idle_ttl => {
                    data.last_seen = Instant::now();
                    return (id.to_string(), false);
                }
                Some(_) => {
                    sessions.remove(id);
                }
                None => {}
            }
        }

        let id = random_token(32);
        sessions.insert(id.clone(), SessionData::new());
        tracing::debug!(sessions = sessions.len(), "session started");
        (id, true)
    }

    /// Whether `id` names a live session; touching it extends its lifetime.
    pub fn touch(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(data) if data.last_seen.elapsed() < self.idle_ttl => {
                data.last_seen = Instant::now();
                true
            }
            Some(_) => {
                sessions.remove(id);
                false
            }
            None => false,
        }
    }

    /// The session's current token, reissued once expired.
    pub fn csrf_token(&self, id: &str) -> Option<String> {
        let mut sessions = self.lock();
        let data = sessions.get_mut(id)?;
        if data.csrf.as_ref().map_or(true, CsrfToken::is_expired) {
            data.csrf = Some(CsrfToken::generate());
        }
        data.csrf.as_ref().map(|token| token.value().to_string())
    }

    pub fn verify_csrf(&self, id: &str, candidate: &str) -> bool {
        self.lock()
            .get(id)
            .and_then(|data| data.csrf.as_ref())
            .is_some_and(|token| token.verify(candidate))
    }

    pub fn flash(&self, id: &str, flash: Flash) {
        if let Some(data) = self.lock().get_mut(id) {
            data.flashes.push(flash);
        }
    }

    /// Pending flashes, removed from the session.
    pub fn take_flashes(&self, id: &str) -> Vec<Flash> {
        self.lock()
            .get_mut(id)
            .map(|data| data.flashes.take())
            .unwrap_or_default()
    }

    /// Drop idle sessions; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, data| data.last_seen.elapsed() < self.idle_ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}
