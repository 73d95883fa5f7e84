//! Session orchestration for Mingle: the icebreaker state machine, the
//! nested King Game, and the workers that run them.
//!
//! The layering inside this crate:
//!
//! ```text
//! SessionRegistry          — session id → live worker
//!     └── SessionWorker    — one task per session (actor)
//!           ├── IcebreakerState   — outer phase machine (pure)
//!           ├── KingGame          — nested card game (pure)
//!           └── PresenceManager   — grace windows, sweeps
//! ```
//!
//! The state machines are pure: operations return
//! `(Recipient, ServerMessage)` pairs and the worker does the fan-out.
//! Everything time- or I/O-shaped (timers, the closing-message
//! collaborator, command moderation) lives in the worker.

mod actor;
mod collab;
mod config;
mod error;
mod icebreaker;
mod king;
mod registry;

pub use actor::{spawn_session, ParticipantSender, SessionHandle};
pub use collab::{
    AllowAll, ClosingMessageGenerator, CollabError, ContentFilter,
    NoClosingMessage, SessionSummary,
};
pub use config::SessionConfig;
pub use error::SessionError;
pub use icebreaker::{IcebreakerState, Outbound, Participant};
pub use king::{KingGame, KingPlayer};
pub use registry::SessionRegistry;
