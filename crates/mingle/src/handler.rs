//! Per-connection handler: envelope decoding, rate limiting, and
//! session binding.
//!
//! Each accepted connection gets its own tokio task running this
//! handler. The flow is:
//!   1. First decodable message must be `JOIN_SESSION` — it binds the
//!      connection to one `(sessionId, userId)` pair and spawns the
//!      worker if the session is new.
//!   2. A writer task forwards everything the worker addresses to this
//!      participant back out over the socket.
//!   3. Loop: receive frames → heartbeat inline → rate limit → decode →
//!      forward to the worker.
//!
//! Malformed frames are logged and dropped; they never reach a state
//! machine and never tear the connection down.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use mingle_presence::RateLimiter;
use mingle_protocol::{
    ClientMessage, Codec, Envelope, ProtocolError, ServerMessage,
    SessionId, UserId, SYSTEM_USER,
};
use mingle_session::{
    ClosingMessageGenerator, ContentFilter, SessionError, SessionHandle,
};
use mingle_transport::{Connection, WebSocketConnection};

use crate::server::ServerState;
use crate::MingleError;

/// Connections silent for this long are closed. Heartbeating clients
/// stay well under it.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Drop guard that reports transport loss when the handler exits — even
/// on panic. `Drop` is synchronous, so the detach rides a spawned task.
struct DetachGuard {
    handle: SessionHandle,
    user_id: UserId,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let handle = self.handle.clone();
        let user_id = self.user_id;
        tokio::spawn(async move {
            let _ = handle.detach(user_id).await;
        });
    }
}

/// The connection's identity once `JOIN_SESSION` succeeded.
struct Binding {
    session_id: SessionId,
    user_id: UserId,
    handle: SessionHandle,
    writer: tokio::task::JoinHandle<()>,
    _guard: DetachGuard,
}

impl Drop for Binding {
    fn drop(&mut self) {
        // The socket is going away; undelivered fan-out is moot.
        self.writer.abort();
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<G, F, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<G, F, C>>,
) -> Result<(), MingleError>
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let mut limiter = RateLimiter::new(state.config.rate_limit);
    let mut binding: Option<Binding> = None;

    loop {
        let text = match tokio::time::timeout(IDLE_TIMEOUT, conn.recv())
            .await
        {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection idle, closing");
                break;
            }
        };

        let envelope: Envelope<ClientMessage> =
            match state.codec.decode(text.as_bytes()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(
                        %conn_id,
                        error = %e,
                        "malformed envelope dropped"
                    );
                    continue;
                }
            };
        let Envelope {
            session_id,
            user_id,
            msg,
        } = envelope;

        // Heartbeats are answered inline and never count against the
        // rate limit — throttled clients must still be able to prove
        // they are alive.
        if let ClientMessage::Heartbeat { client_time } = msg {
            send_message(
                &conn,
                &state.codec,
                session_id,
                ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: unix_millis(),
                },
            )
            .await?;
            continue;
        }

        if let Err(retry) = limiter.check() {
            send_message(
                &conn,
                &state.codec,
                session_id,
                ServerMessage::RateLimited {
                    retry_after_ms: retry.ms,
                },
            )
            .await?;
            continue;
        }

        match (binding.as_ref(), msg) {
            (None, ClientMessage::JoinSession { display_name }) => {
                match join(&conn, &state, session_id, user_id, display_name)
                    .await
                {
                    Ok(bound) => {
                        tracing::info!(
                            %conn_id,
                            %session_id,
                            %user_id,
                            "connection bound to session"
                        );
                        binding = Some(bound);
                    }
                    Err(error) => {
                        send_message(
                            &conn,
                            &state.codec,
                            session_id,
                            ServerMessage::Error {
                                code: error.code(),
                                message: error.to_string(),
                            },
                        )
                        .await?;
                    }
                }
            }

            (None, _) => {
                send_message(
                    &conn,
                    &state.codec,
                    session_id,
                    ServerMessage::Error {
                        code: 400,
                        message: "send JOIN_SESSION first".into(),
                    },
                )
                .await?;
            }

            (Some(bound), msg) => {
                if session_id != bound.session_id
                    || user_id != bound.user_id
                {
                    send_message(
                        &conn,
                        &state.codec,
                        session_id,
                        ServerMessage::Error {
                            code: 400,
                            message: format!(
                                "this connection belongs to {} as {}",
                                bound.session_id, bound.user_id
                            ),
                        },
                    )
                    .await?;
                    continue;
                }

                if bound.handle.message(user_id, msg).await.is_err() {
                    // The worker is gone: the end grace elapsed.
                    send_message(
                        &conn,
                        &state.codec,
                        session_id,
                        ServerMessage::Error {
                            code: 503,
                            message: format!(
                                "session {session_id} unavailable"
                            ),
                        },
                    )
                    .await?;
                    break;
                }
            }
        }
    }

    // `binding` drops here → writer aborted, detach reported.
    Ok(())
}

/// Spawns the session worker if needed, attaches this connection, and
/// starts the writer task that carries the worker's fan-out to the
/// socket.
async fn join<G, F, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<G, F, C>>,
    session_id: SessionId,
    user_id: UserId,
    display_name: String,
) -> Result<Binding, SessionError>
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
    C: Codec,
{
    if user_id == SYSTEM_USER {
        return Err(SessionError::Rejected(
            "user id 0 is reserved".into(),
        ));
    }

    let handle = state.registry.lock().await.get_or_spawn(session_id);
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    handle.attach(user_id, display_name, tx).await?;

    let writer_conn = conn.clone();
    let writer_state = Arc::clone(state);
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let sent = send_message(
                &writer_conn,
                &writer_state.codec,
                session_id,
                message,
            )
            .await;
            if sent.is_err() {
                break;
            }
        }
    });

    Ok(Binding {
        session_id,
        user_id,
        handle: handle.clone(),
        writer,
        _guard: DetachGuard { handle, user_id },
    })
}

/// Encodes a server message into the flat envelope shape and sends it
/// as one text frame.
async fn send_message<C: Codec>(
    conn: &WebSocketConnection,
    codec: &C,
    session_id: SessionId,
    msg: ServerMessage,
) -> Result<(), MingleError> {
    let envelope = Envelope {
        session_id,
        user_id: SYSTEM_USER,
        msg,
    };
    let bytes = codec.encode(&envelope)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        ProtocolError::InvalidMessage("encoded frame is not UTF-8".into())
    })?;
    conn.send(&text).await?;
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
