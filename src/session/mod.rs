//! Session management
//!
//! Each client conversation gets its own dispatcher (and registry snapshot).
//! The session table sits behind a single mutex; it is the only structure
//! mutated by concurrent request tasks.
//!
//! Requests within one session are not serialized: two concurrent calls on
//! the same session run concurrently against the same dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::{DispatcherFactory, RpcDispatcher};

/// Longest client-supplied session id that is adopted as-is
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Collision-resistant opaque token: 128 random bits, hex encoded
pub fn create_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Whether a client-supplied id can be adopted
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_SESSION_ID_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}

struct Session {
    dispatcher: Arc<RpcDispatcher>,
    scope: CancellationToken,
    created_at: DateTime<Utc>,
    last_accessed: Instant,
    requests: u64,
}

impl Session {
    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.requests += 1;
    }

    /// Release the session's resources: in-flight calls are cancelled
    fn close(self) {
        self.scope.cancel();
    }
}

/// What a request gets back from the manager
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub dispatcher: Arc<RpcDispatcher>,
    /// True when this request created the session
    pub created: bool,
}

/// Diagnostic view of a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub requests: u64,
    pub tool_calls: u64,
}

/// Owns every session
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    factory: DispatcherFactory,
    root: CancellationToken,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(factory: DispatcherFactory) -> Self {
        let max_sessions = factory.config().max_sessions.max(1);
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            root: CancellationToken::new(),
            max_sessions,
        }
    }

    pub fn factory(&self) -> &DispatcherFactory {
        &self.factory
    }

    /// Resolve the session for a request, creating it when needed.
    ///
    /// Unknown but well-formed ids are adopted so a client keeps its token
    /// across an idle sweep; absent or malformed ids get a fresh one.
    pub fn get_or_create(&self, requested: Option<&str>) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();

        if let Some(id) = requested {
            if let Some(session) = sessions.get_mut(id) {
                session.touch();
                return Ok(SessionHandle {
                    id: id.to_string(),
                    dispatcher: session.dispatcher.clone(),
                    created: false,
                });
            }
        }

        let id = match requested {
            Some(id) if is_valid_session_id(id) => id.to_string(),
            Some(id) => {
                tracing::debug!("Ignoring malformed session id ({} bytes)", id.len());
                create_session_id()
            }
            None => create_session_id(),
        };

        if sessions.len() >= self.max_sessions {
            Self::evict_least_recent(&mut sessions);
        }

        let scope = self.root.child_token();
        let dispatcher = Arc::new(self.factory.create(scope.clone())?);
        let mut session = Session {
            dispatcher: dispatcher.clone(),
            scope,
            created_at: Utc::now(),
            last_accessed: Instant::now(),
            requests: 0,
        };
        session.touch();
        sessions.insert(id.clone(), session);
        tracing::info!("Session created: {} ({} active)", id, sessions.len());

        Ok(SessionHandle {
            id,
            dispatcher,
            created: true,
        })
    }

    fn evict_least_recent(sessions: &mut HashMap<String, Session>) {
        let oldest = sessions
            .iter()
            .min_by_key(|(_, s)| s.last_accessed)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            if let Some(session) = sessions.remove(&id) {
                session.close();
                tracing::info!("Session evicted (capacity): {}", id);
            }
        }
    }

    /// Drop a session; removing an unknown id is a no-op
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(session) => {
                session.close();
                tracing::info!("Session removed: {}", id);
                true
            }
            None => false,
        }
    }

    /// Remove every session idle for longer than `max_age`
    pub fn sweep_idle(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_accessed) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.close();
            }
        }
        if !expired.is_empty() {
            tracing::info!(
                "Swept {} idle sessions ({} active)",
                expired.len(),
                sessions.len()
            );
        }
        expired.len()
    }

    /// Remove every session (shutdown)
    pub fn clear_all(&self) -> usize {
        let drained: Vec<(String, Session)> = self.sessions.lock().drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            session.close();
        }
        if count > 0 {
            tracing::info!("Cleared {} sessions", count);
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let now = Instant::now();
        let sessions = self.sessions.lock();
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, s)| SessionSummary {
                id: id.clone(),
                created_at: s.created_at,
                idle_secs: now.saturating_duration_since(s.last_accessed).as_secs(),
                requests: s.requests,
                tool_calls: s.dispatcher.stats().tool_calls,
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }
}

/// Periodically evict idle sessions until `shutdown` is cancelled
pub fn spawn_idle_sweeper(
    sessions: Arc<SessionManager>,
    interval: Duration,
    max_age: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sessions.sweep_idle(max_age);
                }
            }
        }
        tracing::debug!("Idle session sweeper stopped");
    })
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
