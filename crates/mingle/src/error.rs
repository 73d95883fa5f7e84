//! Unified error type for the Mingle server.

use mingle_protocol::ProtocolError;
use mingle_session::SessionError;
use mingle_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `mingle` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MingleError {
    /// A transport-level error (accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown session, wrong phase, capacity).
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_protocol::SessionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::NotText;
        let top: MingleError = err.into();
        assert!(matches!(top, MingleError::Transport(_)));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let top: MingleError = err.into();
        assert!(matches!(top, MingleError::Protocol(_)));
        assert!(top.to_string().contains("bad"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(SessionId(3));
        let top: MingleError = err.into();
        assert!(matches!(top, MingleError::Session(_)));
        assert!(top.to_string().contains("S-3"));
    }
}
