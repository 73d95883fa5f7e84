//! External collaborator seams: closing-message generation and command
//! moderation.
//!
//! Both are traits with `impl Future` methods so the server can plug in
//! real backends (an LLM gateway, a moderation service) while tests and
//! the default build stay dependency-free. The session worker never
//! blocks on either: generation runs under a hard timeout and degrades
//! to `None`; moderation rejects the single offending message only.

use std::future::Future;

/// Facts about a finished session, handed to the closing-message
/// collaborator.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: mingle_protocol::SessionId,
    pub participant_count: u32,
    pub duration_secs: u64,
}

/// Why a collaborator produced no result.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// No backend is configured.
    #[error("collaborator disabled")]
    Disabled,

    /// The backend was reached but failed.
    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// Produces the farewell text broadcast in `SESSION_ENDED`.
///
/// Failure (or a timeout enforced by the caller) is not an error path
/// for the session: it ends either way, with a `null` closing message.
pub trait ClosingMessageGenerator: Send + Sync + 'static {
    fn closing_message(
        &self,
        summary: &SessionSummary,
    ) -> impl Future<Output = Result<String, CollabError>> + Send;
}

/// The default generator: always declines, so sessions end with a
/// `null` closing message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClosingMessage;

impl ClosingMessageGenerator for NoClosingMessage {
    fn closing_message(
        &self,
        _summary: &SessionSummary,
    ) -> impl Future<Output = Result<String, CollabError>> + Send {
        std::future::ready(Err(CollabError::Disabled))
    }
}

/// Screens king commands before they are broadcast.
///
/// A rejection drops that one command (the sender gets an error notice);
/// it never affects the round state or the connection.
pub trait ContentFilter: Send + Sync + 'static {
    fn allows(&self, text: &str) -> impl Future<Output = bool> + Send;
}

/// The default filter: allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContentFilter for AllowAll {
    fn allows(&self, _text: &str) -> impl Future<Output = bool> + Send {
        std::future::ready(true)
    }
}
