use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

pub const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct Session<T> {
    owner: u64,
    results: T,
    expires_at: Instant,
}

/// Short-lived values keyed by the id of the message that displays them
/// (or by user id, for per-user state).
/// Expired entries are never returned, swept or not.
pub struct SessionCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<u64, Session<T>>>,
}

impl<T: Clone + Send + 'static> SessionCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self, message_id: u64, owner: u64, results: T) {
        self.create_at(message_id, owner, results, Instant::now()).await
    }

    /// Results for `owner`, extending the session. Other users get nothing.
    pub async fn get(&self, message_id: u64, owner: u64) -> Option<T> {
        self.get_at(message_id, owner, Instant::now()).await
    }

    pub async fn remove(&self, message_id: u64) -> bool {
        self.entries.lock().await.remove(&message_id).is_some()
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    async fn create_at(&self, message_id: u64, owner: u64, results: T, now: Instant) {
        let session = Session {
            owner,
            results,
            expires_at: now + self.ttl,
        };
        self.entries.lock().await.insert(message_id, session);
        debug!(message_id, owner, "session stored");
    }

    async fn get_at(&self, message_id: u64, owner: u64, now: Instant) -> Option<T> {
        let mut entries = self.entries.lock().await;
        let session = entries.get_mut(&message_id)?;

        if session.expires_at <= now {
            entries.remove(&message_id);
            debug!(message_id, "session expired");
            return None;
        }
        if session.owner != owner {
            debug!(message_id, owner, expected = session.owner, "session owner mismatch");
            return None;
        }

        session.expires_at = now + self.ttl;
        Some(session.results.clone())
    }

    async fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, s| s.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "expired sessions swept");
        }
        removed
    }
}
