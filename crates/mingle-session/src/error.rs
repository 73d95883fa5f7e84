//! Error types for the session layer.

use mingle_protocol::{SessionId, UserId};

/// A rejected operation against a session's state machines.
///
/// These never tear down a session or a connection. The worker maps each
/// one to a best-effort `ERROR { code, message }` notice for the sender
/// and the session state stays untouched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No worker exists for this session id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session already reached its terminal phase.
    #[error("session {0} has ended")]
    Ended(SessionId),

    /// The operation is not legal in the current phase.
    #[error("wrong phase: {0}")]
    WrongPhase(String),

    /// The sender never joined this session (or this game).
    #[error("user {0} is not a participant")]
    NotParticipant(UserId),

    /// Check-in refused: the gathering is at its expected headcount.
    #[error("at capacity: {0}")]
    Capacity(String),

    /// A king-only operation from a player who is not the king.
    #[error("user {0} is not the king")]
    NotKing(UserId),

    /// Input failed validation (bad target number, rejected command
    /// text, zero expected attendees, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The worker's command channel is gone; the session is unreachable.
    #[error("session {0} unavailable")]
    Unavailable(SessionId),
}

impl SessionError {
    /// HTTP-convention code carried in the `ERROR` notice.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Ended(_) => 410,
            Self::WrongPhase(_) | Self::Capacity(_) => 409,
            Self::NotParticipant(_) | Self::NotKing(_) => 403,
            Self::Rejected(_) => 422,
            Self::Unavailable(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_http_conventions() {
        assert_eq!(SessionError::NotFound(SessionId(1)).code(), 404);
        assert_eq!(SessionError::Ended(SessionId(1)).code(), 410);
        assert_eq!(SessionError::WrongPhase("x".into()).code(), 409);
        assert_eq!(SessionError::Capacity("full".into()).code(), 409);
        assert_eq!(SessionError::NotParticipant(UserId(2)).code(), 403);
        assert_eq!(SessionError::NotKing(UserId(2)).code(), 403);
        assert_eq!(SessionError::Rejected("bad".into()).code(), 422);
        assert_eq!(SessionError::Unavailable(SessionId(1)).code(), 503);
    }

    #[test]
    fn test_error_display_names_the_subject() {
        let err = SessionError::NotFound(SessionId(7));
        assert_eq!(err.to_string(), "session S-7 not found");
        let err = SessionError::NotKing(UserId(3));
        assert_eq!(err.to_string(), "user U-3 is not the king");
    }
}
