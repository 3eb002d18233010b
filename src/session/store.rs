//! Session store adapter.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::SessionRecord;
use crate::error::DrummerError;
use crate::run::record::RunRecord;
use crate::run::RunId;

/// Key-value session storage indexed by session id.
///
/// Run records live inside their parent session; `get_run` exists for
/// background-run polling.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>, DrummerError>;

    async fn upsert(&self, session: SessionRecord) -> Result<(), DrummerError>;

    async fn get_run(
        &self,
        run_id: RunId,
        session_id: &str,
    ) -> Result<Option<RunRecord>, DrummerError> {
        Ok(self
            .read(session_id)
            .await?
            .and_then(|session| session.get_run(run_id).cloned()))
    }

    /// Read the session, creating a fresh record when absent.
    async fn read_or_create(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<SessionRecord, DrummerError> {
        match self.read(session_id).await? {
            Some(session) => Ok(session),
            None => Ok(SessionRecord::new(
                session_id,
                user_id.map(str::to_string),
            )),
        }
    }
}

/// Mutex-guarded in-memory store. The default backend for tests and for
/// agents that do not configure durable storage.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>, DrummerError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| DrummerError::Storage("session store lock poisoned".into()))?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn upsert(&self, session: SessionRecord) -> Result<(), DrummerError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| DrummerError::Storage("session store lock poisoned".into()))?;
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }
}
