//! Error types for the presence layer.

use mingle_protocol::UserId;

/// Errors that can occur during presence tracking.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// No presence record exists for the given participant.
    /// Raised when trying to detach a user who never attached.
    #[error("no presence record for user {0}")]
    Unknown(UserId),
}
