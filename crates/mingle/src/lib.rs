//! # Mingle
//!
//! Real-time coordination server for in-person icebreaker gatherings:
//! phased sessions (check-in, number plates, free mingling) with a
//! nested King Game card round, over WebSocket text-frame JSON.
//!
//! The meta-crate ties the layers together:
//!
//! ```text
//! mingle-transport   — WebSocket accept loop, text frames
//! mingle-protocol    — envelope + message enums, JSON codec
//! mingle-presence    — reconnect grace windows, rate limiting
//! mingle-session     — state machines, session workers, registry
//! mingle (this)      — server builder, per-connection handler
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mingle::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MingleError> {
//!     mingle::init_tracing();
//!     let server = MingleServerBuilder::new()
//!         .bind("0.0.0.0:8080")
//!         .build_default()
//!         .await?;
//!     server.run().await
//! }
//! ```

mod error;
mod handler;
mod server;

pub use error::MingleError;
pub use server::{MingleServer, MingleServerBuilder};

/// Installs the default tracing subscriber, filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Everything needed to stand up a server.
pub mod prelude {
    pub use crate::{MingleError, MingleServer, MingleServerBuilder};
    pub use mingle_protocol::{
        ClientMessage, Envelope, Phase, ServerMessage, SessionId, UserId,
    };
    pub use mingle_session::{
        AllowAll, ClosingMessageGenerator, ContentFilter,
        NoClosingMessage, SessionConfig,
    };
}
