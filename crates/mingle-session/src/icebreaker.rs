//! The outer icebreaker state machine.
//!
//! Pure state: no channels, no clocks, no I/O. Every operation either
//! fails with a [`SessionError`] (state untouched) or returns the
//! `(Recipient, ServerMessage)` pairs the worker should fan out. That
//! keeps the whole phase flow testable with plain function calls.
//!
//! ```text
//! waiting → checkin → number_assign → icebreaker → ended
//! ```

use rand::seq::SliceRandom;

use mingle_protocol::{
    CheckinEntry, Phase, PlateAssignment, Recipient, ServerMessage,
    SessionId, UserId,
};

use crate::SessionError;

/// Messages produced by one state-machine operation, ready for fan-out.
pub type Outbound = Vec<(Recipient, ServerMessage)>;

/// One joined participant.
///
/// Participants are added on first join and never removed — transport
/// loss and graceful leaves only affect presence, so number plates stay
/// valid for the whole gathering.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub checked_in: bool,
    pub number_plate: Option<u32>,
    pub ready: bool,
}

/// The icebreaker session state machine.
pub struct IcebreakerState {
    session_id: SessionId,
    phase: Phase,
    expected_attendees: u32,
    /// Join order preserved; `CHECKIN_UPDATE` lists follow it.
    participants: Vec<Participant>,
    /// Computed exactly once on the checkin → number_assign transition.
    /// Replaying the trigger rebroadcasts this list, never a reshuffle.
    assignments: Option<Vec<PlateAssignment>>,
    quorum: f64,
    /// Set on end; replayed to anyone attaching afterwards.
    ended: Option<EndRecord>,
}

#[derive(Debug, Clone)]
struct EndRecord {
    closing_message: Option<String>,
    duration_secs: u64,
}

impl IcebreakerState {
    pub fn new(session_id: SessionId, quorum: f64) -> Self {
        Self {
            session_id,
            phase: Phase::Waiting,
            expected_attendees: 0,
            participants: Vec::new(),
            assignments: None,
            quorum: quorum.clamp(0.0, 1.0),
            ended: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    fn participant_mut(
        &mut self,
        user_id: UserId,
    ) -> Result<&mut Participant, SessionError> {
        self.participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(SessionError::NotParticipant(user_id))
    }

    /// The `SESSION_ENDED` broadcast, replayable for late attaches.
    pub fn ended_replay(&self) -> Option<ServerMessage> {
        self.ended.as_ref().map(|end| ServerMessage::SessionEnded {
            ai_closing_message: end.closing_message.clone(),
            duration_secs: end.duration_secs,
        })
    }

    /// Adds a participant on first join; later joins are idempotent.
    ///
    /// The joiner gets the current check-in record (and the plate list,
    /// once it exists) unicast back, so a late or reconnecting client
    /// resynchronizes from the join alone.
    pub fn join(
        &mut self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<Outbound, SessionError> {
        if self.phase == Phase::Ended {
            return Err(SessionError::Ended(self.session_id));
        }

        if self.participant(user_id).is_none() {
            self.participants.push(Participant {
                user_id,
                display_name: display_name.to_owned(),
                checked_in: false,
                number_plate: None,
                ready: false,
            });
            tracing::info!(
                session_id = %self.session_id,
                %user_id,
                display_name,
                "participant joined"
            );
        }

        let mut messages = Vec::new();
        if self.phase != Phase::Waiting {
            messages.push((Recipient::User(user_id), self.checkin_record()));
        }
        if let Some(assignments) = &self.assignments {
            messages.push((
                Recipient::User(user_id),
                ServerMessage::NumberAssigned {
                    assignments: assignments.clone(),
                },
            ));
        }
        Ok(messages)
    }

    /// Operator trigger: `waiting → checkin`.
    pub fn start_activity(
        &mut self,
        expected_attendees: u32,
    ) -> Result<Outbound, SessionError> {
        if self.phase != Phase::Waiting {
            return Err(SessionError::WrongPhase(format!(
                "cannot start activity during {}",
                self.phase
            )));
        }
        if expected_attendees == 0 {
            return Err(SessionError::Rejected(
                "expected attendees must be at least 1".into(),
            ));
        }

        self.expected_attendees = expected_attendees;
        self.phase = Phase::Checkin;
        tracing::info!(
            session_id = %self.session_id,
            expected_attendees,
            "activity started"
        );
        Ok(vec![(
            Recipient::All,
            ServerMessage::PhaseChange {
                phase: Phase::Checkin,
                previous_phase: Phase::Waiting,
            },
        )])
    }

    /// Marks a participant checked in and broadcasts the full record.
    ///
    /// Duplicate check-ins are idempotent no-ops: no state change, no
    /// broadcast. A check-in past the expected headcount is refused.
    pub fn checkin(
        &mut self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        if self.phase != Phase::Checkin {
            return Err(SessionError::WrongPhase(format!(
                "check-in is closed during {}",
                self.phase
            )));
        }
        if self.participant(user_id).is_none() {
            return Err(SessionError::NotParticipant(user_id));
        }
        if self
            .participant(user_id)
            .is_some_and(|p| p.checked_in)
        {
            return Ok(Vec::new());
        }
        let expected = self.expected_attendees;
        if self.checked_in_count() >= expected {
            return Err(SessionError::Capacity(format!(
                "all {expected} expected attendees already checked in"
            )));
        }

        self.participant_mut(user_id)?.checked_in = true;
        tracing::debug!(
            session_id = %self.session_id,
            %user_id,
            checked_in = self.checked_in_count(),
            "check-in recorded"
        );
        Ok(vec![(Recipient::All, self.checkin_record())])
    }

    /// Operator trigger: `checkin → number_assign`, plus the one and
    /// only plate shuffle.
    ///
    /// Replaying the trigger in `number_assign` rebroadcasts the cached
    /// list so a lost broadcast can be recovered without a reshuffle.
    pub fn assign_numbers(&mut self) -> Result<Outbound, SessionError> {
        match self.phase {
            Phase::NumberAssign => {
                let assignments = self
                    .assignments
                    .clone()
                    .unwrap_or_default();
                Ok(vec![(
                    Recipient::All,
                    ServerMessage::NumberAssigned { assignments },
                )])
            }
            Phase::Checkin => {
                if self.checked_in_count() == 0 {
                    return Err(SessionError::Rejected(
                        "nobody has checked in yet".into(),
                    ));
                }

                let mut checked_in: Vec<UserId> = self
                    .participants
                    .iter()
                    .filter(|p| p.checked_in)
                    .map(|p| p.user_id)
                    .collect();
                checked_in.shuffle(&mut rand::rng());

                let assignments: Vec<PlateAssignment> = checked_in
                    .iter()
                    .enumerate()
                    .map(|(i, &user_id)| PlateAssignment {
                        user_id,
                        number_plate: i as u32 + 1,
                    })
                    .collect();
                for assignment in &assignments {
                    if let Ok(p) = self.participant_mut(assignment.user_id)
                    {
                        p.number_plate = Some(assignment.number_plate);
                    }
                }
                self.assignments = Some(assignments.clone());
                self.phase = Phase::NumberAssign;
                tracing::info!(
                    session_id = %self.session_id,
                    plates = assignments.len(),
                    "number plates assigned"
                );
                Ok(vec![
                    (
                        Recipient::All,
                        ServerMessage::PhaseChange {
                            phase: Phase::NumberAssign,
                            previous_phase: Phase::Checkin,
                        },
                    ),
                    (
                        Recipient::All,
                        ServerMessage::NumberAssigned { assignments },
                    ),
                ])
            }
            other => Err(SessionError::WrongPhase(format!(
                "cannot assign numbers during {other}"
            ))),
        }
    }

    /// Records one ready vote and recomputes the count.
    ///
    /// A vote for a phase other than the current one is stale and
    /// refused. Duplicate votes are idempotent. When the ready ratio
    /// reaches the quorum during `number_assign`, the session advances
    /// to `icebreaker` in the same call.
    pub fn ready_vote(
        &mut self,
        user_id: UserId,
        vote_phase: Phase,
        is_auto_vote: bool,
    ) -> Result<Outbound, SessionError> {
        if self.phase == Phase::Ended {
            return Err(SessionError::Ended(self.session_id));
        }
        if vote_phase != self.phase {
            return Err(SessionError::WrongPhase(format!(
                "vote for {vote_phase} arrived during {}",
                self.phase
            )));
        }

        let participant = self.participant_mut(user_id)?;
        if participant.ready {
            return Ok(Vec::new());
        }
        participant.ready = true;
        tracing::debug!(
            session_id = %self.session_id,
            %user_id,
            is_auto_vote,
            "ready vote recorded"
        );

        let ready_count = self.ready_count();
        let ready_ratio =
            f64::from(ready_count) / self.participants.len() as f64;
        let mut messages = vec![(
            Recipient::All,
            ServerMessage::ReadyCountUpdate {
                ready_count,
                ready_ratio,
            },
        )];

        if self.phase == Phase::NumberAssign && ready_ratio >= self.quorum {
            self.phase = Phase::Icebreaker;
            for p in &mut self.participants {
                p.ready = false;
            }
            tracing::info!(
                session_id = %self.session_id,
                ready_count,
                "quorum reached, icebreaker begins"
            );
            messages.push((
                Recipient::All,
                ServerMessage::PhaseChange {
                    phase: Phase::Icebreaker,
                    previous_phase: Phase::NumberAssign,
                },
            ));
        }
        Ok(messages)
    }

    /// Casts auto votes for everyone who has not voted, stopping as soon
    /// as the phase advances. Called by the worker when the auto-ready
    /// deadline fires; a no-op outside `number_assign`.
    pub fn auto_ready(&mut self) -> Outbound {
        let mut messages = Vec::new();
        let pending: Vec<UserId> = self
            .participants
            .iter()
            .filter(|p| !p.ready)
            .map(|p| p.user_id)
            .collect();

        for user_id in pending {
            if self.phase != Phase::NumberAssign {
                break;
            }
            if let Ok(mut out) =
                self.ready_vote(user_id, Phase::NumberAssign, true)
            {
                messages.append(&mut out);
            }
        }
        messages
    }

    /// Broadcasts the latest topic selection. Advisory only: the newest
    /// selection simply overwrites whatever clients were showing.
    pub fn select_topic(
        &mut self,
        user_id: UserId,
        topic_id: u64,
        topic_title: &str,
    ) -> Result<Outbound, SessionError> {
        self.require_icebreaker("topics")?;
        if self.participant(user_id).is_none() {
            return Err(SessionError::NotParticipant(user_id));
        }
        Ok(vec![(
            Recipient::All,
            ServerMessage::TopicSelected {
                topic_id,
                topic_title: topic_title.to_owned(),
                selected_by: user_id,
            },
        )])
    }

    /// Broadcasts a mini-game announcement (advisory, like topics).
    pub fn start_game(
        &mut self,
        user_id: UserId,
        game_id: u64,
        game_name: &str,
    ) -> Result<Outbound, SessionError> {
        self.require_icebreaker("mini-games")?;
        if self.participant(user_id).is_none() {
            return Err(SessionError::NotParticipant(user_id));
        }
        Ok(vec![(
            Recipient::All,
            ServerMessage::GameStarted {
                game_id,
                game_name: game_name.to_owned(),
                started_by: user_id,
            },
        )])
    }

    /// `icebreaker → ended`. The closing message is whatever the
    /// collaborator produced, or `None` when it failed or timed out.
    pub fn end(
        &mut self,
        closing_message: Option<String>,
        duration_secs: u64,
    ) -> Result<Outbound, SessionError> {
        if self.phase == Phase::Ended {
            return Err(SessionError::Ended(self.session_id));
        }
        if self.phase != Phase::Icebreaker {
            return Err(SessionError::WrongPhase(format!(
                "cannot end during {}",
                self.phase
            )));
        }

        self.phase = Phase::Ended;
        self.ended = Some(EndRecord {
            closing_message: closing_message.clone(),
            duration_secs,
        });
        tracing::info!(
            session_id = %self.session_id,
            duration_secs,
            has_closing_message = closing_message.is_some(),
            "session ended"
        );
        Ok(vec![
            (
                Recipient::All,
                ServerMessage::PhaseChange {
                    phase: Phase::Ended,
                    previous_phase: Phase::Icebreaker,
                },
            ),
            (
                Recipient::All,
                ServerMessage::SessionEnded {
                    ai_closing_message: closing_message,
                    duration_secs,
                },
            ),
        ])
    }

    /// The full check-in record — always the complete membership, never
    /// a delta.
    pub fn checkin_record(&self) -> ServerMessage {
        ServerMessage::CheckinUpdate {
            checked_in_count: self.checked_in_count(),
            expected_attendees: self.expected_attendees,
            checkins: self
                .participants
                .iter()
                .map(|p| CheckinEntry {
                    user_id: p.user_id,
                    display_name: p.display_name.clone(),
                })
                .collect(),
        }
    }

    pub fn checked_in_count(&self) -> u32 {
        self.participants.iter().filter(|p| p.checked_in).count() as u32
    }

    pub fn ready_count(&self) -> u32 {
        self.participants.iter().filter(|p| p.ready).count() as u32
    }

    fn require_icebreaker(
        &self,
        what: &str,
    ) -> Result<(), SessionError> {
        if self.phase == Phase::Icebreaker {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(format!(
                "{what} are only available during icebreaker, not {}",
                self.phase
            )))
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
