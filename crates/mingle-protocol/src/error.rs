//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating
/// wire messages.
///
/// None of these are fatal to a session: a malformed inbound
/// message is logged and dropped by the connection handler, never
/// forwarded to a state machine.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields,
    /// wrong data types, or an unknown message `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but violates a protocol rule — e.g. a message
    /// for a session the connection never joined.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
