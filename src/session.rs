//! Short-lived conversation memory for the streaming demo.

use crate::metrics::ACTIVE_SESSIONS;
use crate::providers::groq::ChatMessage;
use dashmap::DashMap;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, info};

pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);
pub const MAX_HISTORY_ITEMS: usize = 8;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const MAX_SESSION_ID_LEN: usize = 128;

/// `session_<unix millis>_<8 random alphanumerics>`
pub fn create_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("session_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// Client ids are opaque: any non-blank string up to 128 characters without
/// control characters is accepted as is.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.trim().is_empty()
        && id.chars().count() <= MAX_SESSION_ID_LEN
        && !id.chars().any(char::is_control)
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatMessage>,
    pub updated_at: Instant,
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
    max_history: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL, MAX_HISTORY_ITEMS)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration, max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_history,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|session| session.clone())
    }

    /// Resolves the id a request should use: an acceptable client id is kept,
    /// anything else gets a fresh one. The session is touched or created.
    pub fn get_or_create(&self, requested: Option<&str>) -> Session {
        let id = requested
            .map(str::trim)
            .filter(|id| is_valid_session_id(id))
            .map_or_else(create_session_id, str::to_string);

        let now = Instant::now();
        let session = self
            .sessions
            .entry(id.clone())
            .and_modify(|session| session.updated_at = now)
            .or_insert_with(|| Session {
                id,
                history: Vec::new(),
                updated_at: now,
            })
            .clone();
        ACTIVE_SESSIONS.set(self.sessions.len() as f64);
        session
    }

    /// Appends one turn, keeping only the most recent `max_history` items.
    pub fn append(&self, id: &str, message: ChatMessage) {
        let now = Instant::now();
        let mut session = self.sessions.entry(id.to_string()).or_insert_with(|| Session {
            id: id.to_string(),
            history: Vec::new(),
            updated_at: now,
        });
        session.history.push(message);
        let overflow = session.history.len().saturating_sub(self.max_history);
        if overflow > 0 {
            session.history.drain(..overflow);
        }
        session.updated_at = now;
    }

    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.saturating_duration_since(session.updated_at) <= self.ttl);
        ACTIVE_SESSIONS.set(self.sessions.len() as f64);
        before.saturating_sub(self.sessions.len())
    }
}

pub fn spawn_sweeper(store: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        info!(interval = ?every, "Session sweeper started");

        loop {
            ticker.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!(removed, active = store.len(), "Expired demo sessions removed");
            }
        }
    })
}
