//! Card deck construction and shuffling for the King Game.
//!
//! Pure functions, no state of its own. A deck for `n` players is exactly
//! `n` numbered cards (1..=n) plus exactly one King card (no number) —
//! `n + 1` cards in total. During a round every player draws one card,
//! leaving a single undrawn card whose number (if it has one) becomes the
//! round's mystery number.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A single King Game card.
///
/// Exactly one of `number`/`is_king` is meaningful: numbered cards carry
/// `Some(n)` and `is_king == false`; the King carries `None` and
/// `is_king == true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Stable identity within the deck (used for logging/snapshots).
    pub id: u32,
    /// The card's number, or `None` for the King.
    pub number: Option<u32>,
    /// Whether this is the King card.
    pub is_king: bool,
}

/// Builds a fresh, unshuffled deck for `n` players.
///
/// The result holds `n` numbered cards (1..=n, ids 1..=n) followed by
/// the single King card (id `n + 1`).
pub fn build_deck(n: u32) -> Vec<Card> {
    let mut deck = Vec::with_capacity(n as usize + 1);
    for number in 1..=n {
        deck.push(Card {
            id: number,
            number: Some(number),
            is_king: false,
        });
    }
    deck.push(Card {
        id: n + 1,
        number: None,
        is_king: true,
    });
    deck
}

/// Shuffles a deck in place with a uniform, unbiased permutation.
///
/// Uses the thread RNG, reseeded by the OS — callers get an independent
/// permutation every round. Fisher–Yates under the hood via
/// [`SliceRandom::shuffle`].
pub fn shuffle(deck: &mut [Card]) {
    deck.shuffle(&mut rand::rng());
}

/// Builds and shuffles a deck for `n` players in one step.
pub fn shuffled_deck(n: u32) -> Vec<Card> {
    let mut deck = build_deck(n);
    shuffle(&mut deck);
    deck
}

// =========================================================================
// Tests
// =========================================================================
