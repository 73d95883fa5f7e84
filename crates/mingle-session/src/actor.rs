//! The session worker: one tokio task owning all state for one session.
//!
//! All mutation happens inside the task, driven by commands from a
//! bounded mpsc channel, so the state machines stay lock-free and
//! single-threaded. Connection handlers talk to the worker through a
//! cloneable [`SessionHandle`].
//!
//! Besides commands the worker multiplexes three timers in its select
//! loop: the presence sweep interval, the auto-ready deadline (armed
//! when plates are assigned), and the post-end grace deadline after
//! which the task stops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use mingle_presence::{Attach, PresenceManager};
use mingle_protocol::{
    ClientMessage, Phase, Recipient, ServerMessage, SessionId, UserId,
};

use crate::collab::{
    ClosingMessageGenerator, ContentFilter, SessionSummary,
};
use crate::{
    IcebreakerState, KingGame, Outbound, SessionConfig, SessionError,
};

/// How each participant's connection receives its outbound messages.
pub type ParticipantSender = mpsc::UnboundedSender<ServerMessage>;

const COMMAND_BUFFER: usize = 64;

pub(crate) enum SessionCommand {
    Attach {
        user_id: UserId,
        display_name: String,
        sender: ParticipantSender,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Transport loss — starts the reconnect grace window.
    Detach { user_id: UserId },
    Message {
        user_id: UserId,
        message: ClientMessage,
    },
    Shutdown,
}

/// Cloneable handle to one session worker.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns `true` once the worker task has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Attaches a connection for `user_id`, joining them on first
    /// contact. The worker confirms before any message flows.
    pub async fn attach(
        &self,
        user_id: UserId,
        display_name: String,
        sender: ParticipantSender,
    ) -> Result<(), SessionError> {
        let (reply, confirm) = oneshot::channel();
        self.send(SessionCommand::Attach {
            user_id,
            display_name,
            sender,
            reply,
        })
        .await?;
        confirm
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?
    }

    /// Reports transport loss for `user_id`.
    pub async fn detach(&self, user_id: UserId) -> Result<(), SessionError> {
        self.send(SessionCommand::Detach { user_id }).await
    }

    /// Forwards one decoded client message.
    pub async fn message(
        &self,
        user_id: UserId,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Message { user_id, message }).await
    }

    /// Asks the worker to stop. Already-stopped workers are fine.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SessionCommand::Shutdown).await;
    }

    async fn send(
        &self,
        command: SessionCommand,
    ) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }
}

/// Spawns a worker task for `session_id` and returns its handle.
pub fn spawn_session<G, F>(
    session_id: SessionId,
    config: SessionConfig,
    generator: Arc<G>,
    filter: Arc<F>,
) -> SessionHandle
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
{
    let config = config.validated();
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let worker = SessionWorker {
        session_id,
        icebreaker: IcebreakerState::new(session_id, config.quorum),
        king: None,
        presence: PresenceManager::new(config.presence.clone()),
        senders: HashMap::new(),
        receiver,
        generator,
        filter,
        started_at: Instant::now(),
        auto_ready_at: None,
        stop_at: None,
        config,
    };
    tokio::spawn(worker.run());
    tracing::info!(%session_id, "session worker spawned");
    SessionHandle { session_id, sender }
}

struct SessionWorker<G, F> {
    session_id: SessionId,
    config: SessionConfig,
    icebreaker: IcebreakerState,
    /// Created lazily on the first `KING_GAME_JOIN`.
    king: Option<KingGame>,
    presence: PresenceManager,
    senders: HashMap<UserId, ParticipantSender>,
    receiver: mpsc::Receiver<SessionCommand>,
    generator: Arc<G>,
    filter: Arc<F>,
    started_at: Instant,
    auto_ready_at: Option<Instant>,
    stop_at: Option<Instant>,
}

/// Sleeps until `at`, or forever when no deadline is armed.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<G, F> SessionWorker<G, F>
where
    G: ClosingMessageGenerator,
    F: ContentFilter,
{
    async fn run(mut self) {
        let mut sweep = time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = sweep.tick() => self.sweep(),
                _ = deadline(self.auto_ready_at) => {
                    self.auto_ready_at = None;
                    tracing::info!(
                        session_id = %self.session_id,
                        "auto-ready deadline fired"
                    );
                    let messages = self.icebreaker.auto_ready();
                    self.dispatch(messages);
                },
                _ = deadline(self.stop_at) => break,
            }
        }
        tracing::info!(session_id = %self.session_id, "session worker stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach {
                user_id,
                display_name,
                sender,
                reply,
            } => {
                let result = self.attach(user_id, &display_name, sender);
                let _ = reply.send(result);
            }
            SessionCommand::Detach { user_id } => {
                self.senders.remove(&user_id);
                if self.presence.disconnect(user_id).is_err() {
                    tracing::debug!(
                        session_id = %self.session_id,
                        %user_id,
                        "detach for unknown user ignored"
                    );
                }
            }
            SessionCommand::Message { user_id, message } => {
                self.handle_message(user_id, message).await;
            }
            // Handled in the run loop.
            SessionCommand::Shutdown => {}
        }
    }

    fn attach(
        &mut self,
        user_id: UserId,
        display_name: &str,
        sender: ParticipantSender,
    ) -> Result<(), SessionError> {
        // Ended sessions keep accepting attaches during the end grace so
        // a late reconnect still hears the terminal broadcast.
        let messages = if self.icebreaker.phase() == Phase::Ended {
            self.icebreaker
                .ended_replay()
                .map(|replay| vec![(Recipient::User(user_id), replay)])
                .unwrap_or_default()
        } else {
            self.icebreaker.join(user_id, display_name)?
        };

        let outcome = self.presence.connect(user_id);
        self.senders.insert(user_id, sender);
        if outcome == Attach::Reconnected {
            self.dispatch(vec![(
                Recipient::AllExcept(user_id),
                ServerMessage::UserReconnected { user_id },
            )]);
        }
        self.dispatch(messages);
        Ok(())
    }

    fn sweep(&mut self) {
        for user_id in self.presence.sweep() {
            self.senders.remove(&user_id);
            self.dispatch(vec![(
                Recipient::All,
                ServerMessage::UserOffline { user_id },
            )]);
        }
    }

    async fn handle_message(
        &mut self,
        user_id: UserId,
        message: ClientMessage,
    ) {
        let result = match message {
            // Joins arrive as Attach commands; a repeat on a live
            // connection is harmless.
            ClientMessage::JoinSession { .. } => Ok(Vec::new()),

            ClientMessage::Checkin => self.icebreaker.checkin(user_id),

            ClientMessage::StartActivity { expected_attendees } => {
                self.icebreaker.start_activity(expected_attendees)
            }

            ClientMessage::AssignNumbers => {
                let result = self.icebreaker.assign_numbers();
                if result.is_ok() && self.auto_ready_at.is_none() {
                    self.auto_ready_at = Some(
                        Instant::now() + self.config.auto_ready_timeout,
                    );
                }
                result
            }

            ClientMessage::ReadyVote { phase, is_auto_vote } => {
                let result =
                    self.icebreaker.ready_vote(user_id, phase, is_auto_vote);
                if self.icebreaker.phase() != Phase::NumberAssign {
                    self.auto_ready_at = None;
                }
                result
            }

            ClientMessage::SelectTopic { topic_id, topic_title } => self
                .icebreaker
                .select_topic(user_id, topic_id, &topic_title),

            ClientMessage::StartGame { game_id, game_name } => {
                self.icebreaker.start_game(user_id, game_id, &game_name)
            }

            ClientMessage::EndSession => self.end_session().await,

            ClientMessage::UserLeft => self.user_left(user_id),

            // Normally answered inline by the connection handler; echo
            // here too so direct callers get their ack.
            ClientMessage::Heartbeat { client_time } => Ok(vec![(
                Recipient::User(user_id),
                ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: unix_millis(),
                },
            )]),

            ClientMessage::KingGameJoin {
                icebreaker_session_id,
                display_name,
                player_count: _,
            } => self.king_game_join(
                user_id,
                icebreaker_session_id,
                &display_name,
            ),

            ClientMessage::PlayerReady => {
                self.king_mut().and_then(|k| k.player_ready(user_id))
            }

            ClientMessage::StartDeal => {
                self.king_mut().and_then(|k| k.start_deal(user_id))
            }

            ClientMessage::DrawCard => {
                self.king_mut().and_then(|k| k.draw(user_id))
            }

            ClientMessage::IssueCommand { command, target_number } => {
                if self.filter.allows(&command).await {
                    self.king_mut().and_then(|k| {
                        k.issue_command(user_id, &command, target_number)
                    })
                } else {
                    Err(SessionError::Rejected(
                        "command text rejected by moderation".into(),
                    ))
                }
            }

            ClientMessage::CompleteRound => {
                self.king_mut().and_then(KingGame::complete_round)
            }

            ClientMessage::StateSync => {
                self.king_mut().and_then(|k| k.state_sync(user_id))
            }
        };

        match result {
            Ok(messages) => self.dispatch(messages),
            Err(error) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    %user_id,
                    %error,
                    "message refused"
                );
                self.dispatch(vec![(
                    Recipient::User(user_id),
                    ServerMessage::Error {
                        code: error.code(),
                        message: error.to_string(),
                    },
                )]);
            }
        }
    }

    fn king_game_join(
        &mut self,
        user_id: UserId,
        icebreaker_session_id: SessionId,
        display_name: &str,
    ) -> Result<Outbound, SessionError> {
        if icebreaker_session_id != self.session_id {
            return Err(SessionError::Rejected(format!(
                "king game join names session {icebreaker_session_id}, \
                 this is {}",
                self.session_id
            )));
        }
        if self.icebreaker.phase() != Phase::Icebreaker {
            return Err(SessionError::WrongPhase(format!(
                "the king game runs inside the icebreaker phase, not {}",
                self.icebreaker.phase()
            )));
        }
        let session_id = self.session_id;
        self.king
            .get_or_insert_with(|| KingGame::new(session_id))
            .join(user_id, display_name)
    }

    fn king_mut(&mut self) -> Result<&mut KingGame, SessionError> {
        self.king.as_mut().ok_or_else(|| {
            SessionError::WrongPhase(
                "the king game has not started".into(),
            )
        })
    }

    fn user_left(
        &mut self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        self.senders.remove(&user_id);
        self.presence
            .offline(user_id)
            .map_err(|_| SessionError::NotParticipant(user_id))?;
        tracing::info!(
            session_id = %self.session_id,
            %user_id,
            "participant left"
        );
        // Deliberate leave: offline immediately, no grace window.
        Ok(vec![(
            Recipient::AllExcept(user_id),
            ServerMessage::UserOffline { user_id },
        )])
    }

    async fn end_session(&mut self) -> Result<Outbound, SessionError> {
        match self.icebreaker.phase() {
            Phase::Ended => {
                return Err(SessionError::Ended(self.session_id))
            }
            Phase::Icebreaker => {}
            other => {
                return Err(SessionError::WrongPhase(format!(
                    "cannot end during {other}"
                )))
            }
        }

        let duration_secs = self.started_at.elapsed().as_secs();
        let summary = SessionSummary {
            session_id: self.session_id,
            participant_count: self.icebreaker.participants().len() as u32,
            duration_secs,
        };
        let closing = match time::timeout(
            self.config.closing_message_timeout,
            self.generator.closing_message(&summary),
        )
        .await
        {
            Ok(Ok(text)) => Some(text),
            Ok(Err(error)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    %error,
                    "closing message generation failed"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    "closing message generation timed out"
                );
                None
            }
        };

        let messages = self.icebreaker.end(closing, duration_secs)?;
        self.auto_ready_at = None;
        self.stop_at = Some(Instant::now() + self.config.end_grace);
        Ok(messages)
    }

    /// Fans messages out to their recipients. A send to a gone receiver
    /// is silently dropped — the presence sweep handles stragglers.
    fn dispatch(&mut self, messages: Outbound) {
        for (recipient, message) in messages {
            match recipient {
                Recipient::All => {
                    for sender in self.senders.values() {
                        let _ = sender.send(message.clone());
                    }
                }
                Recipient::User(user_id) => {
                    if let Some(sender) = self.senders.get(&user_id) {
                        let _ = sender.send(message);
                    }
                }
                Recipient::AllExcept(skip) => {
                    for (user_id, sender) in &self.senders {
                        if *user_id != skip {
                            let _ = sender.send(message.clone());
                        }
                    }
                }
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
