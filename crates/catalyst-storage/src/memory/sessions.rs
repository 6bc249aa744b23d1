//! In-memory session store.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use catalyst_core::{CatalystError, CatalystResult, NewSession, Session, SessionTouch};

use crate::sessions::SessionStore;

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, id: &str) -> CatalystResult<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create_session(&self, input: NewSession) -> CatalystResult<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&input.id) {
            return Err(CatalystError::duplicate_id(format!(
                "session '{}' already exists",
                input.id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: input.id.clone(),
            user_id: input.user_id,
            created_at: input.created_at.unwrap_or(now),
            last_seen_at: now,
            factors_verified: input.factors_verified,
            metadata: input.metadata,
        };
        sessions.insert(input.id, session.clone());
        Ok(session)
    }

    async fn touch_session(&self, id: &str, touch: SessionTouch) -> CatalystResult<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| CatalystError::not_found(format!("session {id}")))?;

        session.last_seen_at = touch.last_seen_at;
        if touch.metadata.is_some() {
            session.metadata = touch.metadata;
        }
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &str) -> CatalystResult<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }
}
