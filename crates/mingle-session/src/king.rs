//! The nested King Game engine.
//!
//! Runs inside the icebreaker phase of a parent session. Same shape as
//! [`IcebreakerState`](crate::IcebreakerState): pure state, operations
//! return `(Recipient, ServerMessage)` pairs, and this machine loops —
//! a finished round rests in `completed` until the next deal starts.
//! `waiting` is the same resting state before the first round.
//!
//! The deck carries one more card than there are players, so after
//! everyone draws exactly one card remains face down. If that card is
//! numbered, the King is in someone's hand and is revealed publicly
//! with the undrawn ("mystery") number. If the undrawn card *is* the
//! King, nobody is king this round and the table is left to notice it
//! themselves — no reveal is sent.

use mingle_deck::{shuffled_deck, Card};
use mingle_protocol::{
    KingPhase, KingPlayerEntry, Recipient, ServerMessage, SessionId, UserId,
};

use crate::{Outbound, SessionError};

/// One King Game player. The held card is private state — it only ever
/// leaves this struct through a unicast `CARD_DEALT` or the `my*`
/// fields of the requester's own `STATE_SYNC`.
#[derive(Debug, Clone)]
pub struct KingPlayer {
    pub user_id: UserId,
    pub display_name: String,
    pub ready: bool,
    pub drawn: bool,
    card: Option<Card>,
}

impl KingPlayer {
    fn entry(&self) -> KingPlayerEntry {
        KingPlayerEntry {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            ready: self.ready,
            drawn: self.drawn,
        }
    }
}

/// The King Game state machine for one parent session.
pub struct KingGame {
    parent: SessionId,
    phase: KingPhase,
    round_number: u32,
    players: Vec<KingPlayer>,
    dealer_id: Option<UserId>,
    king_user_id: Option<UserId>,
    mystery_number: Option<u32>,
    current_command: Option<String>,
    target_number: Option<u32>,
    /// Undrawn cards, pre-shuffled at deal start. Players pop from here.
    deck: Vec<Card>,
    drawn_count: u32,
}

impl KingGame {
    pub fn new(parent: SessionId) -> Self {
        Self {
            parent,
            phase: KingPhase::Waiting,
            round_number: 1,
            players: Vec::new(),
            dealer_id: None,
            king_user_id: None,
            mystery_number: None,
            current_command: None,
            target_number: None,
            deck: Vec::new(),
            drawn_count: 0,
        }
    }

    pub fn phase(&self) -> KingPhase {
        self.phase
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn players(&self) -> &[KingPlayer] {
        &self.players
    }

    fn player(&self, user_id: UserId) -> Option<&KingPlayer> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    fn player_mut(
        &mut self,
        user_id: UserId,
    ) -> Result<&mut KingPlayer, SessionError> {
        self.players
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(SessionError::NotParticipant(user_id))
    }

    fn entries(&self) -> Vec<KingPlayerEntry> {
        self.players.iter().map(KingPlayer::entry).collect()
    }

    /// `waiting` before the first round, `completed` after any later
    /// one. Joining, readiness, and dealing are legal in both.
    fn between_rounds(&self) -> bool {
        matches!(self.phase, KingPhase::Waiting | KingPhase::Completed)
    }

    /// Adds a player between rounds. Rejoining is idempotent; either way
    /// the full membership is rebroadcast.
    pub fn join(
        &mut self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<Outbound, SessionError> {
        if !self.between_rounds() {
            return Err(SessionError::WrongPhase(format!(
                "players can only join between rounds, not during {}",
                self.phase
            )));
        }

        if self.player(user_id).is_none() {
            self.players.push(KingPlayer {
                user_id,
                display_name: display_name.to_owned(),
                ready: false,
                drawn: false,
                card: None,
            });
            tracing::info!(
                session_id = %self.parent,
                %user_id,
                display_name,
                players = self.players.len(),
                "king game player joined"
            );
        }

        Ok(vec![(
            Recipient::All,
            ServerMessage::PlayerJoined {
                players: self.entries(),
                player_count: self.players.len() as u32,
            },
        )])
    }

    /// Marks a player ready for the next round. Idempotent.
    pub fn player_ready(
        &mut self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        if !self.between_rounds() {
            return Err(SessionError::WrongPhase(format!(
                "readiness only matters between rounds, not during {}",
                self.phase
            )));
        }

        let player = self.player_mut(user_id)?;
        if player.ready {
            return Ok(Vec::new());
        }
        player.ready = true;

        let ready_count =
            self.players.iter().filter(|p| p.ready).count() as u32;
        Ok(vec![(
            Recipient::All,
            ServerMessage::PlayerReady {
                user_id,
                ready_count,
            },
        )])
    }

    /// Any ready player may trigger the deal and becomes the dealer.
    ///
    /// Builds a fresh shuffled deck of `players + 1` cards and clears
    /// all per-round state from the previous round.
    pub fn start_deal(
        &mut self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        if !self.between_rounds() {
            return Err(SessionError::WrongPhase(format!(
                "a deal is already underway ({})",
                self.phase
            )));
        }
        let player = self.player(user_id).cloned();
        let Some(player) = player else {
            return Err(SessionError::NotParticipant(user_id));
        };
        if !player.ready {
            return Err(SessionError::Rejected(
                "only a ready player may start the deal".into(),
            ));
        }
        if self.players.len() < 2 {
            return Err(SessionError::Rejected(
                "the king game needs at least 2 players".into(),
            ));
        }

        self.dealer_id = Some(user_id);
        self.king_user_id = None;
        self.mystery_number = None;
        self.current_command = None;
        self.target_number = None;
        self.drawn_count = 0;
        for p in &mut self.players {
            p.drawn = false;
            p.card = None;
        }
        self.deck = shuffled_deck(self.players.len() as u32);
        self.phase = KingPhase::Dealing;

        tracing::info!(
            session_id = %self.parent,
            round = self.round_number,
            dealer = %user_id,
            deck = self.deck.len(),
            "deal started"
        );
        Ok(vec![(
            Recipient::All,
            ServerMessage::StartDeal {
                dealer_id: user_id,
                dealer_name: player.display_name,
            },
        )])
    }

    /// Draws one card for the requesting player.
    ///
    /// The card itself goes to that player alone. Once every player has
    /// drawn, `ALL_CARDS_DRAWN` is broadcast and the undrawn card
    /// decides the reveal: numbered → `KING_REVEALED`; the King itself →
    /// nothing, the round stalls in `dealing` on purpose.
    pub fn draw(
        &mut self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        if self.phase != KingPhase::Dealing {
            return Err(SessionError::WrongPhase(format!(
                "no deal in progress ({})",
                self.phase
            )));
        }
        {
            let player = self.player_mut(user_id)?;
            if player.drawn {
                return Err(SessionError::Rejected(
                    "already drew a card this round".into(),
                ));
            }
        }
        let Some(card) = self.deck.pop() else {
            return Err(SessionError::Rejected(
                "the deck is exhausted".into(),
            ));
        };

        self.drawn_count += 1;
        let drawn_count = self.drawn_count;
        let dealt = ServerMessage::CardDealt {
            user_id,
            card_number: card.number,
            is_king: card.is_king,
            drawn_count,
        };
        {
            let player = self.player_mut(user_id)?;
            player.drawn = true;
            player.card = Some(card);
        }
        tracing::debug!(
            session_id = %self.parent,
            %user_id,
            drawn_count,
            "card drawn"
        );

        let mut messages = vec![(Recipient::User(user_id), dealt)];

        if drawn_count as usize == self.players.len() {
            messages.push((
                Recipient::All,
                ServerMessage::AllCardsDrawn { drawn_count },
            ));
            messages.extend(self.resolve_reveal());
        }
        Ok(messages)
    }

    /// Inspects the single undrawn card after the last draw.
    fn resolve_reveal(&mut self) -> Outbound {
        let Some(undrawn) = self.deck.last() else {
            return Vec::new();
        };
        let Some(mystery_number) = undrawn.number else {
            // The King stayed in the deck: nobody is king this round.
            // No reveal — the table figures it out on its own.
            tracing::info!(
                session_id = %self.parent,
                round = self.round_number,
                "king undrawn, round stalls with no reveal"
            );
            return Vec::new();
        };

        let king = self
            .players
            .iter()
            .find(|p| p.card.as_ref().is_some_and(|c| c.is_king));
        let Some(king) = king else {
            return Vec::new();
        };

        self.king_user_id = Some(king.user_id);
        self.mystery_number = Some(mystery_number);
        self.phase = KingPhase::Commanding;
        tracing::info!(
            session_id = %self.parent,
            round = self.round_number,
            king = %king.user_id,
            mystery_number,
            "king revealed"
        );
        vec![(
            Recipient::All,
            ServerMessage::KingRevealed {
                king_user_id: king.user_id,
                king_display_name: king.display_name.clone(),
                mystery_number,
            },
        )]
    }

    /// The revealed king issues exactly one command for the round.
    pub fn issue_command(
        &mut self,
        user_id: UserId,
        command: &str,
        target_number: u32,
    ) -> Result<Outbound, SessionError> {
        if self.phase != KingPhase::Commanding {
            return Err(SessionError::WrongPhase(format!(
                "no command expected during {}",
                self.phase
            )));
        }
        if self.king_user_id != Some(user_id) {
            return Err(SessionError::NotKing(user_id));
        }
        let max = self.players.len() as u32;
        if target_number == 0 || target_number > max {
            return Err(SessionError::Rejected(format!(
                "target number must be between 1 and {max}"
            )));
        }

        self.current_command = Some(command.to_owned());
        self.target_number = Some(target_number);
        self.phase = KingPhase::Executing;
        tracing::info!(
            session_id = %self.parent,
            round = self.round_number,
            target_number,
            "command issued"
        );
        Ok(vec![(
            Recipient::All,
            ServerMessage::CommandIssued {
                command: command.to_owned(),
                target_number,
            },
        )])
    }

    /// Closes the round once the command has been acted out.
    ///
    /// Broadcasts the finished round number and rests in `completed`
    /// until the next deal: per-round player flags reset, membership
    /// and the incremented round count survive.
    pub fn complete_round(&mut self) -> Result<Outbound, SessionError> {
        if self.phase != KingPhase::Executing {
            return Err(SessionError::WrongPhase(format!(
                "no round to complete during {}",
                self.phase
            )));
        }

        let finished = self.round_number;
        self.round_number += 1;
        self.phase = KingPhase::Completed;
        for p in &mut self.players {
            p.ready = false;
            p.drawn = false;
        }
        tracing::info!(
            session_id = %self.parent,
            round = finished,
            "round complete"
        );
        Ok(vec![(
            Recipient::All,
            ServerMessage::RoundComplete {
                round_number: finished,
            },
        )])
    }

    /// Builds the requester's full snapshot. Public fields are shared;
    /// the `my*` fields come from the requester's own card only.
    pub fn state_sync(
        &self,
        user_id: UserId,
    ) -> Result<Outbound, SessionError> {
        let player = self
            .player(user_id)
            .ok_or(SessionError::NotParticipant(user_id))?;
        let card = player.card.as_ref();

        Ok(vec![(
            Recipient::User(user_id),
            ServerMessage::StateSync {
                phase: self.phase,
                players: self.entries(),
                round_number: self.round_number,
                dealer_id: self.dealer_id,
                king_user_id: self.king_user_id,
                mystery_number: self.mystery_number,
                current_command: self.current_command.clone(),
                target_number: self.target_number,
                my_card_number: card.and_then(|c| c.number),
                my_is_king: card.is_some_and(|c| c.is_king),
            },
        )])
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(id: u64) -> UserId {
        UserId(id)
    }

    /// A game in `waiting` with `n` joined, ready players.
    fn ready_game(n: u64) -> KingGame {
        let mut game = KingGame::new(SessionId(1));
        for id in 1..=n {
            game.join(uid(id), &format!("player-{id}")).unwrap();
            game.player_ready(uid(id)).unwrap();
        }
        game
    }

    /// Forces a known deck so draw order is deterministic. Players pop
    /// from the back.
    fn rig_deck(game: &mut KingGame, cards: Vec<Card>) {
        assert_eq!(game.deck.len(), cards.len(), "rigged deck size");
        game.deck = cards;
    }

    fn numbered(id: u32, number: u32) -> Card {
        Card {
            id,
            number: Some(number),
            is_king: false,
        }
    }

    fn king_card(id: u32) -> Card {
        Card {
            id,
            number: None,
            is_king: true,
        }
    }

    #[test]
    fn test_join_broadcasts_full_membership() {
        let mut game = KingGame::new(SessionId(1));
        game.join(uid(1), "Ana").unwrap();

        let messages = game.join(uid(2), "Bo").unwrap();

        assert!(matches!(
            messages.as_slice(),
            [(
                Recipient::All,
                ServerMessage::PlayerJoined {
                    player_count: 2,
                    players,
                }
            )] if players.len() == 2
        ));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut game = KingGame::new(SessionId(1));
        game.join(uid(1), "Ana").unwrap();
        game.join(uid(1), "Ana").unwrap();

        assert_eq!(game.players().len(), 1);
    }

    #[test]
    fn test_join_during_deal_is_refused() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();

        assert!(matches!(
            game.join(uid(9), "Late"),
            Err(SessionError::WrongPhase(_))
        ));
    }

    #[test]
    fn test_start_deal_requires_ready_dealer() {
        let mut game = KingGame::new(SessionId(1));
        game.join(uid(1), "Ana").unwrap();
        game.join(uid(2), "Bo").unwrap();

        assert!(matches!(
            game.start_deal(uid(1)),
            Err(SessionError::Rejected(_))
        ));
    }

    #[test]
    fn test_start_deal_builds_players_plus_one_deck() {
        let mut game = ready_game(5);

        let messages = game.start_deal(uid(3)).unwrap();

        assert_eq!(game.phase(), KingPhase::Dealing);
        assert_eq!(game.deck.len(), 6);
        assert!(matches!(
            messages.as_slice(),
            [(
                Recipient::All,
                ServerMessage::StartDeal { dealer_id, .. }
            )] if *dealer_id == uid(3)
        ));
    }

    #[test]
    fn test_draw_is_unicast_to_drawer() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();

        let messages = game.draw(uid(2)).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::User(uid(2)));
        assert!(matches!(
            messages[0].1,
            ServerMessage::CardDealt { drawn_count: 1, .. }
        ));
    }

    #[test]
    fn test_draw_twice_is_refused() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        game.draw(uid(1)).unwrap();

        assert!(matches!(
            game.draw(uid(1)),
            Err(SessionError::Rejected(_))
        ));
        assert_eq!(game.drawn_count, 1);
    }

    #[test]
    fn test_king_drawn_third_is_revealed_after_last_draw() {
        // 5 players, deck rigged so the third drawer gets the King and
        // number 2 stays undrawn as the mystery number.
        let mut game = ready_game(5);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(2, 2),  // stays undrawn (popped last, never is)
                numbered(5, 5),  // 5th draw
                numbered(4, 4),  // 4th draw
                king_card(6),    // 3rd draw
                numbered(3, 3),  // 2nd draw
                numbered(1, 1),  // 1st draw
            ],
        );

        for id in 1..=4 {
            let messages = game.draw(uid(id)).unwrap();
            assert_eq!(messages.len(), 1, "no reveal before the last draw");
        }
        assert_eq!(game.phase(), KingPhase::Dealing);

        let messages = game.draw(uid(5)).unwrap();

        assert_eq!(game.phase(), KingPhase::Commanding);
        assert!(matches!(
            messages.as_slice(),
            [
                (Recipient::User(_), ServerMessage::CardDealt { .. }),
                (
                    Recipient::All,
                    ServerMessage::AllCardsDrawn { drawn_count: 5 }
                ),
                (
                    Recipient::All,
                    ServerMessage::KingRevealed {
                        king_user_id,
                        mystery_number: 2,
                        ..
                    }
                ),
            ] if *king_user_id == uid(3)
        ));
    }

    #[test]
    fn test_king_undrawn_means_no_reveal_and_no_king() {
        // The King is the card that stays in the deck: the round stalls
        // in dealing, silently.
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                king_card(4),   // stays undrawn
                numbered(3, 3), // 3rd draw
                numbered(2, 2), // 2nd draw
                numbered(1, 1), // 1st draw
            ],
        );

        game.draw(uid(1)).unwrap();
        game.draw(uid(2)).unwrap();
        let messages = game.draw(uid(3)).unwrap();

        assert_eq!(game.phase(), KingPhase::Dealing);
        assert!(game.king_user_id.is_none());
        // The last draw still delivers the card and the drawn notice,
        // but no KING_REVEALED follows.
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[1].1,
            ServerMessage::AllCardsDrawn { drawn_count: 3 }
        ));
    }

    #[test]
    fn test_command_from_non_king_is_refused() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(3, 3), // undrawn mystery
                numbered(2, 2),
                numbered(1, 1),
                king_card(4), // 1st draw → uid(1) is king
            ],
        );
        for id in 1..=3 {
            game.draw(uid(id)).unwrap();
        }
        assert_eq!(game.phase(), KingPhase::Commanding);

        assert!(matches!(
            game.issue_command(uid(2), "dance", 2),
            Err(SessionError::NotKing(_))
        ));
    }

    #[test]
    fn test_command_target_out_of_range_is_refused() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(3, 3),
                numbered(2, 2),
                numbered(1, 1),
                king_card(4),
            ],
        );
        for id in 1..=3 {
            game.draw(uid(id)).unwrap();
        }

        assert!(matches!(
            game.issue_command(uid(1), "sing", 0),
            Err(SessionError::Rejected(_))
        ));
        assert!(matches!(
            game.issue_command(uid(1), "sing", 4),
            Err(SessionError::Rejected(_))
        ));
    }

    #[test]
    fn test_exactly_one_command_per_round() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(3, 3),
                numbered(2, 2),
                numbered(1, 1),
                king_card(4),
            ],
        );
        for id in 1..=3 {
            game.draw(uid(id)).unwrap();
        }

        let messages = game.issue_command(uid(1), "sing", 2).unwrap();
        assert_eq!(game.phase(), KingPhase::Executing);
        assert!(matches!(
            messages.as_slice(),
            [(
                Recipient::All,
                ServerMessage::CommandIssued {
                    target_number: 2, ..
                }
            )]
        ));

        // A second command hits the executing phase and is refused.
        assert!(matches!(
            game.issue_command(uid(1), "again", 1),
            Err(SessionError::WrongPhase(_))
        ));
    }

    #[test]
    fn test_complete_round_rests_in_completed() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(3, 3),
                numbered(2, 2),
                numbered(1, 1),
                king_card(4),
            ],
        );
        for id in 1..=3 {
            game.draw(uid(id)).unwrap();
        }
        game.issue_command(uid(1), "sing", 2).unwrap();

        let messages = game.complete_round().unwrap();

        assert!(matches!(
            messages.as_slice(),
            [(
                Recipient::All,
                ServerMessage::RoundComplete { round_number: 1 }
            )]
        ));
        assert_eq!(game.phase(), KingPhase::Completed);
        assert_eq!(game.round_number(), 2);
        // Membership survives; per-round flags do not.
        assert_eq!(game.players().len(), 3);
        assert!(game.players().iter().all(|p| !p.ready && !p.drawn));
    }

    #[test]
    fn test_completed_round_is_visible_and_joinable_between_rounds() {
        let mut game = ready_game(2);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![numbered(2, 2), numbered(1, 1), king_card(3)],
        );
        game.draw(uid(1)).unwrap();
        game.draw(uid(2)).unwrap();
        game.issue_command(uid(1), "bow", 1).unwrap();
        game.complete_round().unwrap();

        // A between-rounds snapshot reports the completed phase.
        let view = game.state_sync(uid(2)).unwrap();
        assert!(matches!(
            &view[0].1,
            ServerMessage::StateSync {
                phase: KingPhase::Completed,
                round_number: 2,
                ..
            }
        ));

        // Latecomers join between rounds, not only before the first.
        game.join(uid(3), "Cleo").unwrap();
        assert_eq!(game.players().len(), 3);
    }

    #[test]
    fn test_next_round_reshuffles_and_replays() {
        let mut game = ready_game(2);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![numbered(2, 2), numbered(1, 1), king_card(3)],
        );
        game.draw(uid(1)).unwrap();
        game.draw(uid(2)).unwrap();
        game.issue_command(uid(1), "swap seats", 1).unwrap();
        game.complete_round().unwrap();

        // Round 2: readiness must be re-earned before dealing again.
        assert!(matches!(
            game.start_deal(uid(1)),
            Err(SessionError::Rejected(_))
        ));
        game.player_ready(uid(1)).unwrap();
        game.start_deal(uid(1)).unwrap();

        assert_eq!(game.phase(), KingPhase::Dealing);
        assert_eq!(game.deck.len(), 3);
        assert!(game.king_user_id.is_none());
        assert!(game.mystery_number.is_none());
        assert!(game.current_command.is_none());
    }

    #[test]
    fn test_state_sync_fills_private_fields_per_requester() {
        let mut game = ready_game(3);
        game.start_deal(uid(1)).unwrap();
        rig_deck(
            &mut game,
            vec![
                numbered(3, 3),
                numbered(2, 2),
                numbered(1, 1),
                king_card(4),
            ],
        );
        for id in 1..=3 {
            game.draw(uid(id)).unwrap();
        }

        let king_view = game.state_sync(uid(1)).unwrap();
        assert!(matches!(
            &king_view[0],
            (
                Recipient::User(u),
                ServerMessage::StateSync {
                    phase: KingPhase::Commanding,
                    my_card_number: None,
                    my_is_king: true,
                    mystery_number: Some(3),
                    ..
                }
            ) if *u == uid(1)
        ));

        let holder_view = game.state_sync(uid(2)).unwrap();
        assert!(matches!(
            &holder_view[0],
            (
                _,
                ServerMessage::StateSync {
                    my_card_number: Some(1),
                    my_is_king: false,
                    ..
                }
            )
        ));
    }

    #[test]
    fn test_state_sync_for_stranger_is_refused() {
        let game = ready_game(2);
        assert!(matches!(
            game.state_sync(uid(99)),
            Err(SessionError::NotParticipant(_))
        ));
    }

    #[test]
    fn test_complete_round_outside_executing_is_refused() {
        let mut game = ready_game(2);
        assert!(matches!(
            game.complete_round(),
            Err(SessionError::WrongPhase(_))
        ));
    }
}
