//! The session registry: routes session ids to live workers.
//!
//! One registry sits behind the server's accept loop. Sessions are
//! created on first contact — the first `JOIN_SESSION` naming an id
//! spawns its worker — and evicted once their worker stops (the end
//! grace elapsed, or an explicit shutdown).

use std::collections::HashMap;
use std::sync::Arc;

use mingle_protocol::SessionId;

use crate::actor::{spawn_session, SessionHandle};
use crate::collab::{ClosingMessageGenerator, ContentFilter};
use crate::{SessionConfig, SessionError};

pub struct SessionRegistry<G, F> {
    sessions: HashMap<SessionId, SessionHandle>,
    config: SessionConfig,
    generator: Arc<G>,
    filter: Arc<F>,
}

impl<G, F> SessionRegistry<G, F>
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
{
    pub fn new(
        config: SessionConfig,
        generator: Arc<G>,
        filter: Arc<F>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            config: config.validated(),
            generator,
            filter,
        }
    }

    /// Returns the live handle for `session_id`, spawning a fresh worker
    /// if none exists (or the previous one already stopped).
    pub fn get_or_spawn(&mut self, session_id: SessionId) -> SessionHandle {
        if let Some(handle) = self.sessions.get(&session_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }
        let handle = spawn_session(
            session_id,
            self.config.clone(),
            Arc::clone(&self.generator),
            Arc::clone(&self.filter),
        );
        self.sessions.insert(session_id, handle.clone());
        handle
    }

    /// Returns the live handle for `session_id`, if one exists.
    pub fn get(
        &self,
        session_id: SessionId,
    ) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(&session_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Shuts a session down and forgets it. Returns `false` if the id
    /// was unknown.
    pub async fn evict(&mut self, session_id: SessionId) -> bool {
        match self.sessions.remove(&session_id) {
            Some(handle) => {
                handle.shutdown().await;
                tracing::info!(%session_id, "session evicted");
                true
            }
            None => false,
        }
    }

    /// Drops registry entries whose workers have stopped on their own.
    /// Returns how many were reaped.
    pub fn evict_closed(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !handle.is_closed());
        let reaped = before - self.sessions.len();
        if reaped > 0 {
            tracing::debug!(reaped, "stopped session workers reaped");
        }
        reaped
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
