//! Wire protocol for Mingle.
//!
//! This crate defines the "language" that clients and the session server
//! speak:
//!
//! - **Types** ([`Envelope`], [`ClientMessage`], [`ServerMessage`],
//!   [`Phase`], [`KingPhase`], …) — the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong doing so.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the session
//! engines (participant identity, phases). It knows nothing about
//! connections, presence, or game rules — only message shapes.
//!
//! ```text
//! Transport (frames) → Protocol (Envelope) → Session worker (state)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    CheckinEntry, ClientMessage, Envelope, KingPhase, KingPlayerEntry,
    Phase, PlateAssignment, Recipient, ServerMessage, SessionId, UserId,
    SYSTEM_USER,
};
