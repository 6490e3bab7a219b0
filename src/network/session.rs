//! Session Management
//!
//! A session is one match: its world state plus the guard that serializes
//! every read and write of it. The [`SessionManager`] is the process-wide
//! registry mapping session ids to sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::core::id::fresh_id;
use crate::game::state::{SessionId, WorldConfig, WorldState};
use crate::network::protocol::{Payload, ServerMessage};

/// Configuration shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// World constants for new sessions.
    pub world: WorldConfig,
    /// Length of generated session identifiers.
    pub session_id_len: usize,
    /// Bullets older than this are dropped.
    pub bullet_ttl: Duration,
    /// Sessions without players for this long are removed.
    pub idle_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            session_id_len: 8,
            bullet_ttl: Duration::from_secs(5),
            idle_grace: Duration::from_secs(60),
        }
    }
}

/// A match session.
///
/// The guard covers all entity collections jointly.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: RwLock<WorldState>,
}

impl Session {
    /// Wrap a world in a new session.
    pub fn new(world: WorldState) -> Self {
        Self {
            id: world.id.clone(),
            state: RwLock::new(world),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire shared access to the world.
    pub async fn read(&self) -> RwLockReadGuard<'_, WorldState> {
        self.state.read().await
    }

    /// Acquire exclusive access to the world.
    pub async fn write(&self) -> RwLockWriteGuard<'_, WorldState> {
        self.state.write().await
    }

    /// Serialize a `sessionState` message under a shared guard.
    pub async fn snapshot(&self) -> Result<Payload, serde_json::Error> {
        let world = self.state.read().await;
        ServerMessage::SessionState { session: &*world }.to_payload()
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all active sessions.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<Session>>>,
    /// Settings for new sessions.
    config: SessionConfig,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Settings used for new sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return the session stored under `requested`, creating and seeding it
    /// if absent. A missing or empty id creates a session under a freshly
    /// generated id.
    ///
    /// Lookup and insertion happen under one write lock, so concurrent
    /// callers naming the same unknown id all receive the same session.
    pub async fn resolve(&self, requested: Option<&str>) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;

        let id = match requested.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => fresh_id(&mut rand::thread_rng(), self.config.session_id_len, |c| {
                sessions.contains_key(c)
            }),
        };

        if let Some(session) = sessions.get(&id) {
            return session.clone();
        }

        let session = Arc::new(self.create_session(id.clone()));
        sessions.insert(id, session.clone());
        session
    }

    fn create_session(&self, id: SessionId) -> Session {
        let world = WorldState::seeded(id, self.config.world.clone(), &mut rand::thread_rng());
        info!(
            "Created session {} ({} xp items, {} xp areas)",
            world.id,
            world.xp_items.len(),
            world.xp_areas.len()
        );
        Session::new(world)
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Drop expired bullets in every session. Returns the number removed.
    pub async fn expire_bullets(&self, now: Instant) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut expired = 0;
        for session in sessions {
            let mut world = session.write().await;
            expired += world.expire_bullets(now, self.config.bullet_ttl);
        }
        expired
    }

    /// Remove sessions that have had no players for at least the idle grace
    /// period. Returns the removed ids.
    ///
    /// Removed sessions are retired under their guard so that a connection
    /// which resolved one just before removal can detect it and resolve
    /// again.
    pub async fn reap_idle(&self, now: Instant) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let mut reaped = Vec::new();

        for (id, session) in sessions.iter() {
            let mut world = session.write().await;
            let idle = world
                .idle_for(now)
                .is_some_and(|idle| idle >= self.config.idle_grace);
            if idle {
                world.retire();
                reaped.push(id.clone());
            }
        }

        for id in &reaped {
            sessions.remove(id);
            debug!("Reaped idle session {}", id);
        }

        reaped
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
