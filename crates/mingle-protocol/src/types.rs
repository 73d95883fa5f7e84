//! Core protocol types for Mingle's wire format.
//!
//! This module defines every structure that travels "on the wire" between
//! a participant's device and the session server. The shape is fixed by
//! the client SDK: every message is `{ sessionId, userId, type, data }`,
//! where `type` is a SCREAMING_SNAKE_CASE tag and `data` carries the
//! camelCase payload for that message family.
//!
//! Two enums split the protocol by direction:
//! - [`ClientMessage`] — what a participant (or operator) may send in.
//! - [`ServerMessage`] — what the session worker broadcasts or unicasts out.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a participant.
///
/// Newtype over `u64` so a `SessionId` can never be passed where a
/// `UserId` is expected. `#[serde(transparent)]` keeps the JSON a plain
/// number, which is what the client SDK sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// The envelope subject for server-originated broadcasts.
///
/// Phase changes, sweeps, and timer-driven events have no sending user;
/// their envelopes carry this sentinel. Subject users appear inside the
/// payloads themselves (`selectedBy`, `kingUserId`, ...).
pub const SYSTEM_USER: UserId = UserId(0);

/// A unique identifier for one icebreaker gathering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient — who should receive a message?
// ---------------------------------------------------------------------------

/// Specifies who should receive an outbound message.
///
/// The state machines return `(Recipient, ServerMessage)` pairs; the
/// session worker fans each one out accordingly. `User` is how privately
/// delivered draw results ([`ServerMessage::CardDealt`]) stay private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every connection attached to the session.
    All,

    /// One specific participant (targeted unicast).
    User(UserId),

    /// Everyone except the specified participant.
    AllExcept(UserId),
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// The outer icebreaker session phase.
///
/// Strictly linear — no backward transitions, and `ended` is terminal:
///
/// ```text
/// waiting → checkin → number_assign → icebreaker → ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    Checkin,
    NumberAssign,
    Icebreaker,
    Ended,
}

impl Phase {
    /// The next phase in the linear order, or `None` from `ended`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Checkin),
            Self::Checkin => Some(Self::NumberAssign),
            Self::NumberAssign => Some(Self::Icebreaker),
            Self::Icebreaker => Some(Self::Ended),
            Self::Ended => None,
        }
    }

    /// Returns `true` if moving directly to `target` is legal.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Checkin => "checkin",
            Self::NumberAssign => "number_assign",
            Self::Icebreaker => "icebreaker",
            Self::Ended => "ended",
        };
        write!(f, "{name}")
    }
}

/// The nested King Game phase.
///
/// Unlike [`Phase`], this machine loops: a finished round rests in
/// `completed` until the next deal starts. It only stops when the
/// parent session ends.
///
/// ```text
/// waiting → dealing → commanding → executing → completed → dealing …
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KingPhase {
    Waiting,
    Dealing,
    Commanding,
    Executing,
    Completed,
}

impl fmt::Display for KingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Dealing => "dealing",
            Self::Commanding => "commanding",
            Self::Executing => "executing",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Payload fragments
// ---------------------------------------------------------------------------

/// One row of the full check-in record carried by every
/// [`ServerMessage::CheckinUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinEntry {
    pub user_id: UserId,
    pub display_name: String,
}

/// One row of the plate assignment broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateAssignment {
    pub user_id: UserId,
    pub number_plate: u32,
}

/// A King Game player as seen by everyone (no card identity here —
/// cards are only ever unicast to their holder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KingPlayerEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub ready: bool,
    pub drawn: bool,
}

// ---------------------------------------------------------------------------
// ClientMessage — inbound
// ---------------------------------------------------------------------------

/// Messages a client (participant or operator console) may send.
///
/// `#[serde(tag = "type", content = "data")]` produces the adjacently
/// tagged wire shape: `{ "type": "READY_VOTE", "data": { ... } }`.
/// Variants with no payload omit `data` entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    // -- Icebreaker session --
    /// First message on any connection: attach to the session named in
    /// the envelope, creating it if this is the first participant.
    JoinSession { display_name: String },

    /// Check in to the gathering. Idempotent per user.
    Checkin,

    /// Operator trigger: start the activity (waiting → checkin).
    StartActivity { expected_attendees: u32 },

    /// Operator trigger: attendance judged sufficient, assign plates
    /// (checkin → number_assign).
    AssignNumbers,

    /// Cast a ready vote for the given phase. `is_auto_vote` marks votes
    /// cast by the auto-ready timeout rather than a person.
    ReadyVote { phase: Phase, is_auto_vote: bool },

    /// Propose a shared conversation topic (advisory broadcast).
    SelectTopic { topic_id: u64, topic_title: String },

    /// Announce a mini-game start (advisory broadcast).
    StartGame { game_id: u64, game_name: String },

    /// Operator trigger: end the session (icebreaker → ended).
    EndSession,

    /// Graceful leave. The participant is marked offline, never removed.
    UserLeft,

    /// Keep-alive. Answered inline by the connection handler.
    Heartbeat { client_time: u64 },

    // -- King Game --
    /// Join the nested King Game inside the icebreaker phase.
    KingGameJoin {
        icebreaker_session_id: SessionId,
        display_name: String,
        player_count: u32,
    },

    /// Mark this player ready for the next round.
    PlayerReady,

    /// Any ready player may trigger the deal; they become the dealer.
    StartDeal,

    /// Draw exactly one card. No player receives a card without asking.
    DrawCard,

    /// The revealed king issues their one command.
    IssueCommand { command: String, target_number: u32 },

    /// External trigger: the command was acted out, close the round.
    CompleteRound,

    /// Request a full-state snapshot (resync after reconnect).
    StateSync,
}

// ---------------------------------------------------------------------------
// ServerMessage — outbound
// ---------------------------------------------------------------------------

/// Messages the session worker emits.
///
/// All of these go to every attached connection, with one exception:
/// [`CardDealt`](Self::CardDealt) is delivered only to the drawing user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    // -- Icebreaker session --
    /// The full current check-in record — always the complete membership,
    /// never a delta, so a late joiner resynchronizes from one message.
    CheckinUpdate {
        checked_in_count: u32,
        expected_attendees: u32,
        checkins: Vec<CheckinEntry>,
    },

    /// Recomputed after every ready vote.
    ReadyCountUpdate { ready_count: u32, ready_ratio: f64 },

    /// Emitted on every outer phase transition.
    PhaseChange { phase: Phase, previous_phase: Phase },

    /// The cached 1..=N plate bijection. Replaying the assignment
    /// trigger rebroadcasts this exact list — never a reshuffle.
    NumberAssigned { assignments: Vec<PlateAssignment> },

    /// Latest topic selection (overwrites any previous one).
    TopicSelected {
        topic_id: u64,
        topic_title: String,
        selected_by: UserId,
    },

    /// Latest mini-game announcement.
    GameStarted {
        game_id: u64,
        game_name: String,
        started_by: UserId,
    },

    /// Terminal broadcast. `ai_closing_message` is `null` when the
    /// text-generation collaborator failed or timed out — the session
    /// ends either way.
    SessionEnded {
        ai_closing_message: Option<String>,
        duration_secs: u64,
    },

    /// A participant's reconnect grace window elapsed.
    UserOffline { user_id: UserId },

    /// A participant resumed within the grace window.
    UserReconnected { user_id: UserId },

    // -- King Game --
    /// Membership update after a join.
    PlayerJoined {
        players: Vec<KingPlayerEntry>,
        player_count: u32,
    },

    /// Readiness change.
    PlayerReady { user_id: UserId, ready_count: u32 },

    /// The deal has started; the triggering player is the dealer.
    StartDeal { dealer_id: UserId, dealer_name: String },

    /// Private draw result — unicast to the drawing user only.
    CardDealt {
        user_id: UserId,
        card_number: Option<u32>,
        is_king: bool,
        drawn_count: u32,
    },

    /// Every player has drawn; one card remains undrawn.
    AllCardsDrawn { drawn_count: u32 },

    /// Public reveal: who holds the King, and the undrawn card's number.
    KingRevealed {
        king_user_id: UserId,
        king_display_name: String,
        mystery_number: u32,
    },

    /// The king's single command for this round.
    CommandIssued { command: String, target_number: u32 },

    /// Round closed; per-round flags reset, membership preserved.
    RoundComplete { round_number: u32 },

    /// Full King Game snapshot for post-reconnect resync. The two `my*`
    /// fields are filled per-requester from their private card.
    StateSync {
        phase: KingPhase,
        players: Vec<KingPlayerEntry>,
        round_number: u32,
        dealer_id: Option<UserId>,
        king_user_id: Option<UserId>,
        mystery_number: Option<u32>,
        current_command: Option<String>,
        target_number: Option<u32>,
        my_card_number: Option<u32>,
        my_is_king: bool,
    },

    // -- Cross-cutting --
    /// Sender exceeded the configured message rate. Non-fatal; the
    /// offending message was dropped before reaching any state machine.
    RateLimited { retry_after_ms: u64 },

    /// Keep-alive echo with timing info.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Best-effort rejection notice (wrong phase, capacity, bad input).
    /// Codes follow HTTP conventions.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Envelope — the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level wrapper for both directions.
///
/// `#[serde(flatten)]` splices the tagged message into the envelope
/// object, producing the flat shape the client SDK expects:
///
/// ```text
/// { "sessionId": 7, "userId": 42, "type": "CHECKIN" }
/// { "sessionId": 7, "userId": 0, "type": "PHASE_CHANGE", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<M> {
    /// Which session this message belongs to (connections are
    /// multiplexed by session id).
    pub session_id: SessionId,

    /// The sending user (inbound) or the subject/[`SYSTEM_USER`]
    /// (outbound).
    pub user_id: UserId,

    /// The tagged message body.
    #[serde(flatten)]
    pub msg: M,
}

// =========================================================================
// Tests
// =========================================================================
