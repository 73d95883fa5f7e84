//! `MingleServer` builder and accept loop.
//!
//! This is the entry point for running a Mingle session server. It ties
//! together all the layers: transport → protocol → presence → session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use mingle_protocol::{Codec, JsonCodec};
use mingle_session::{
    AllowAll, ClosingMessageGenerator, ContentFilter, NoClosingMessage,
    SessionConfig, SessionRegistry,
};
use mingle_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::MingleError;

/// How often the registry reaps sessions whose workers stopped.
const REGISTRY_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// registry lock is held only to look a session up or spawn it; all
/// per-session traffic goes through the worker's own channel.
pub(crate) struct ServerState<G, F, C> {
    pub(crate) registry: Mutex<SessionRegistry<G, F>>,
    pub(crate) codec: C,
    pub(crate) config: SessionConfig,
}

/// Builder for configuring and starting a Mingle server.
///
/// ```rust,ignore
/// let server = MingleServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .session_config(config)
///     .build(my_generator, my_filter)
///     .await?;
/// server.run().await
/// ```
pub struct MingleServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
}

impl MingleServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration shared by all sessions.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Builds the server with the given collaborators.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport` — the only wire format
    /// the client SDK speaks.
    pub async fn build<G, F>(
        self,
        generator: G,
        filter: F,
    ) -> Result<MingleServer<G, F, JsonCodec>, MingleError>
    where
        G: ClosingMessageGenerator,
        F: ContentFilter,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let config = self.session_config.validated();

        let state = Arc::new(ServerState {
            registry: Mutex::new(SessionRegistry::new(
                config.clone(),
                Arc::new(generator),
                Arc::new(filter),
            )),
            codec: JsonCodec,
            config,
        });

        Ok(MingleServer { transport, state })
    }

    /// Builds with the default collaborators: no closing messages, no
    /// command moderation.
    pub async fn build_default(
        self,
    ) -> Result<MingleServer<NoClosingMessage, AllowAll, JsonCodec>, MingleError>
    {
        self.build(NoClosingMessage, AllowAll).await
    }
}

impl Default for MingleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Mingle session server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct MingleServer<G, F, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<G, F, C>>,
}

impl<G, F, C> MingleServer<G, F, C>
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, MingleError> {
        Ok(self.transport.local_addr()?)
    }

    /// Runs the server: the accept loop plus a periodic registry reap.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), MingleError> {
        tracing::info!("Mingle server running");

        let reap_state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REGISTRY_REAP_INTERVAL);
            loop {
                tick.tick().await;
                reap_state.registry.lock().await.evict_closed();
            }
        });

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(conn, state).await
                        {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
