//! Participant connection lifecycle for Mingle.
//!
//! This crate handles everything between the raw transport and the
//! session state machines:
//!
//! 1. **Presence tracking** — knowing who is connected, who is inside
//!    their reconnect grace window, and who has gone offline
//!    ([`PresenceManager`]).
//! 2. **Rate limiting** — a per-connection sliding-window guard that
//!    drops floods before they reach any state machine ([`RateLimiter`]).
//! 3. **Demo fallback** — a scripted, purely local phase progression for
//!    clients that never manage to reach a real server ([`demo`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Session worker (above)   ← asks presence who is attached, sweeps grace
//!     ↕
//! Presence layer (this crate)
//!     ↕
//! Connection handler (below) ← reports transport attach/detach events
//! ```
//!
//! The state machines never see transport failures, only the logical
//! joined/reconnected/offline events derived here.

mod demo;
mod error;
mod limiter;
mod manager;

pub use demo::{demo_timeline, DemoStep};
pub use error::PresenceError;
pub use limiter::{RateLimitConfig, RateLimiter, RetryAfter};
pub use manager::{Attach, ConnectionState, PresenceConfig, PresenceManager};
