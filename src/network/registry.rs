//! Session Registry
//!
//! Process-scoped mapping from session id to live session state. The
//! registry's own map is one synchronization point (create / lookup /
//! remove); each session carries its own lock for in-session mutation,
//! so handlers for different sessions never contend.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::model::now_secs;
use crate::model::session::{Session, SessionId};

/// Grace period before an empty session may be reaped (seconds).
/// Covers the window between session creation and the host's roster
/// entry landing under the session lock.
const EMPTY_SESSION_GRACE_SECS: f64 = 2.0;

/// Shared handle to one session's state.
pub type SharedSession = Arc<RwLock<Session>>;

/// Registry of all live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh id, two default teams and no
    /// players, and register it.
    pub async fn create_session(&self) -> (SessionId, SharedSession) {
        let session_id = SessionId::generate();
        let session = Arc::new(RwLock::new(Session::new(session_id)));
        self.sessions
            .write()
            .await
            .insert(session_id, session.clone());
        info!("created session {session_id}");
        (session_id, session)
    }

    /// Look up a session by id.
    pub async fn get(&self, session_id: SessionId) -> Option<SharedSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// All live sessions, for the maintenance sweep.
    pub async fn all(&self) -> Vec<SharedSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove every session whose player map is empty, skipping
    /// sessions younger than the creation grace period. Returns the
    /// removed ids.
    pub async fn remove_empty(&self) -> Vec<SessionId> {
        let now = now_secs();
        let mut sessions = self.sessions.write().await;

        let mut to_remove = Vec::new();
        for (id, session) in sessions.iter() {
            let session = session.read().await;
            if session.is_empty() && now - session.created_at > EMPTY_SESSION_GRACE_SECS {
                to_remove.push(*id);
            }
        }

        for id in &to_remove {
            sessions.remove(id);
            info!("removed empty session {id}");
        }
        to_remove
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = SessionRegistry::new();
        let (session_id, _) = registry.create_session().await;
        assert_eq!(registry.session_count().await, 1);

        let session = registry.get(session_id).await.expect("session exists");
        let session = session.read().await;
        assert_eq!(session.session_id, session_id);
        assert_eq!(session.teams.len(), 2);
        assert!(session.players.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(registry.get(SessionId::generate()).await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_empty_session_survives_reaping() {
        let registry = SessionRegistry::new();
        registry.create_session().await;

        let removed = registry.remove_empty().await;
        assert!(removed.is_empty());
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_empty_session_is_reaped() {
        let registry = SessionRegistry::new();
        let (session_id, session) = registry.create_session().await;
        session.write().await.created_at -= 60.0;

        let removed = registry.remove_empty().await;
        assert_eq!(removed, vec![session_id]);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_populated_session_is_kept() {
        let registry = SessionRegistry::new();
        let (_, session) = registry.create_session().await;
        {
            let mut session = session.write().await;
            session.created_at -= 60.0;
            session.add_player(crate::model::entity::Player::new(
                "ghost".into(),
                Default::default(),
            ));
        }

        let removed = registry.remove_empty().await;
        assert!(removed.is_empty());
        assert_eq!(registry.session_count().await, 1);
    }
}
