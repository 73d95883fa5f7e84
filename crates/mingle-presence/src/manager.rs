//! The presence manager: tracks every participant's connection state.
//!
//! One `PresenceManager` lives inside each session worker, so all access
//! is already serialized — a plain `HashMap` is deliberate, there is no
//! hidden locking here.
//!
//! A participant is never removed from the map. Transport loss only moves
//! them along the state machine below, which is what keeps number-plate
//! assignments stable across reconnects: a participant is added on first
//! join and only ever marked offline afterwards.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mingle_protocol::UserId;

use crate::PresenceError;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for presence behavior.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How long a participant who lost their transport stays in
    /// `Reconnecting` before being swept to `Offline`.
    ///
    /// Default: 30 seconds. Set to zero to disable the grace window.
    pub reconnect_grace: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The connection state of one participant.
///
/// ```text
///   Connected ──(transport loss)──→ Reconnecting ──(grace elapsed)──→ Offline
///       ↑                                │                               │
///       └────────(reconnect)─────────────┘        (fresh join)───────────┘
/// ```
///
/// `Instant` is monotonic, so grace-window arithmetic is immune to wall
/// clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Participant has a live transport.
    Connected,

    /// Transport was lost at `since`; the participant has until
    /// `since + reconnect_grace` to come back as the same record.
    Reconnecting { since: Instant },

    /// Grace elapsed without a reconnect. The record stays (plates stay
    /// assigned) but peers were told `USER_OFFLINE`.
    Offline,
}

/// What happened when a participant attached.
///
/// The session worker turns `Reconnected` into a `USER_RECONNECTED`
/// broadcast; `Joined` and `Resumed` are silent at the presence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// First join, or a fresh join after going fully offline.
    Joined,

    /// Came back within the grace window — same participant record,
    /// same plate.
    Reconnected,

    /// Was still marked connected (e.g. a stale socket being replaced
    /// by a new one). No state change.
    Resumed,
}

// ---------------------------------------------------------------------------
// PresenceManager
// ---------------------------------------------------------------------------

/// Tracks connection state for every participant of one session.
pub struct PresenceManager {
    entries: HashMap<UserId, ConnectionState>,
    config: PresenceConfig,
}

impl PresenceManager {
    /// Creates an empty manager with the given config.
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Records that a participant attached (first join or reconnect).
    ///
    /// Never fails: an unknown user simply becomes a new `Connected`
    /// record. The returned [`Attach`] tells the caller whether peers
    /// should hear about a reconnection.
    pub fn connect(&mut self, user_id: UserId) -> Attach {
        let outcome = match self.entries.get(&user_id) {
            None | Some(ConnectionState::Offline) => Attach::Joined,
            Some(ConnectionState::Connected) => Attach::Resumed,
            Some(ConnectionState::Reconnecting { since }) => {
                if since.elapsed() > self.config.reconnect_grace {
                    // Missed the window but no sweep ran yet — treat it
                    // as the fresh join a sweep would have forced.
                    Attach::Joined
                } else {
                    Attach::Reconnected
                }
            }
        };
        self.entries.insert(user_id, ConnectionState::Connected);
        tracing::debug!(%user_id, ?outcome, "participant attached");
        outcome
    }

    /// Records transport loss. Starts the reconnect grace window.
    ///
    /// # Errors
    /// Returns [`PresenceError::Unknown`] if the user never attached.
    pub fn disconnect(
        &mut self,
        user_id: UserId,
    ) -> Result<(), PresenceError> {
        let state = self
            .entries
            .get_mut(&user_id)
            .ok_or(PresenceError::Unknown(user_id))?;

        if matches!(state, ConnectionState::Connected) {
            *state = ConnectionState::Reconnecting {
                since: Instant::now(),
            };
            tracing::debug!(%user_id, "grace window started");
        }
        Ok(())
    }

    /// Marks a participant offline immediately — a deliberate leave gets
    /// no grace window. The record stays, as always.
    ///
    /// # Errors
    /// Returns [`PresenceError::Unknown`] if the user never attached.
    pub fn offline(&mut self, user_id: UserId) -> Result<(), PresenceError> {
        let state = self
            .entries
            .get_mut(&user_id)
            .ok_or(PresenceError::Unknown(user_id))?;
        *state = ConnectionState::Offline;
        tracing::debug!(%user_id, "participant left, offline immediately");
        Ok(())
    }

    /// Sweeps all records: anyone whose grace window elapsed moves to
    /// `Offline`. Returns those users so the session worker can
    /// broadcast `USER_OFFLINE` for each.
    pub fn sweep(&mut self) -> Vec<UserId> {
        let grace = self.config.reconnect_grace;
        let mut went_offline = Vec::new();

        for (user_id, state) in &mut self.entries {
            if let ConnectionState::Reconnecting { since } = state {
                if since.elapsed() > grace {
                    *state = ConnectionState::Offline;
                    went_offline.push(*user_id);
                    tracing::info!(%user_id, "grace window elapsed, offline");
                }
            }
        }

        went_offline
    }

    /// Current state of a participant, if known.
    pub fn state(&self, user_id: &UserId) -> Option<ConnectionState> {
        self.entries.get(user_id).copied()
    }

    /// Returns `true` if the participant currently has a live transport.
    pub fn is_connected(&self, user_id: &UserId) -> bool {
        matches!(
            self.entries.get(user_id),
            Some(ConnectionState::Connected)
        )
    }

    /// Number of tracked participants (any state).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nobody ever attached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Time-dependent behavior is tested without sleeping: a zero grace
    //! window makes every disconnect expire immediately, a one-hour
    //! window makes nothing expire during the test.

    use super::*;

    fn manager_with_instant_expiry() -> PresenceManager {
        PresenceManager::new(PresenceConfig {
            reconnect_grace: Duration::ZERO,
        })
    }

    fn manager_with_long_grace() -> PresenceManager {
        PresenceManager::new(PresenceConfig {
            reconnect_grace: Duration::from_secs(3600),
        })
    }

    fn uid(id: u64) -> UserId {
        UserId(id)
    }

    #[test]
    fn test_connect_new_user_is_joined() {
        let mut mgr = manager_with_long_grace();

        let outcome = mgr.connect(uid(1));

        assert_eq!(outcome, Attach::Joined);
        assert!(mgr.is_connected(&uid(1)));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_connect_while_connected_is_resumed() {
        // A new socket replacing a stale one must not look like a
        // reconnection to peers.
        let mut mgr = manager_with_long_grace();
        mgr.connect(uid(1));

        let outcome = mgr.connect(uid(1));

        assert_eq!(outcome, Attach::Resumed);
    }

    #[test]
    fn test_connect_within_grace_is_reconnected() {
        let mut mgr = manager_with_long_grace();
        mgr.connect(uid(1));
        mgr.disconnect(uid(1)).unwrap();

        let outcome = mgr.connect(uid(1));

        assert_eq!(outcome, Attach::Reconnected);
        assert!(mgr.is_connected(&uid(1)));
    }

    #[test]
    fn test_connect_after_grace_is_fresh_join() {
        let mut mgr = manager_with_instant_expiry();
        mgr.connect(uid(1));
        mgr.disconnect(uid(1)).unwrap();

        let outcome = mgr.connect(uid(1));

        assert_eq!(outcome, Attach::Joined);
    }

    #[test]
    fn test_disconnect_unknown_user_is_error() {
        let mut mgr = manager_with_long_grace();

        let result = mgr.disconnect(uid(99));

        assert!(
            matches!(result, Err(PresenceError::Unknown(u)) if u == uid(99))
        );
    }

    #[test]
    fn test_disconnect_starts_reconnecting() {
        let mut mgr = manager_with_long_grace();
        mgr.connect(uid(1));

        mgr.disconnect(uid(1)).unwrap();

        assert!(matches!(
            mgr.state(&uid(1)),
            Some(ConnectionState::Reconnecting { .. })
        ));
    }

    #[test]
    fn test_offline_skips_grace_window() {
        // A deliberate leave goes straight to Offline, so no later sweep
        // reports the user a second time.
        let mut mgr = manager_with_instant_expiry();
        mgr.connect(uid(1));

        mgr.offline(uid(1)).unwrap();

        assert_eq!(mgr.state(&uid(1)), Some(ConnectionState::Offline));
        assert!(mgr.sweep().is_empty());
    }

    #[test]
    fn test_offline_unknown_user_is_error() {
        let mut mgr = manager_with_long_grace();
        assert!(matches!(
            mgr.offline(uid(5)),
            Err(PresenceError::Unknown(u)) if u == uid(5)
        ));
    }

    #[test]
    fn test_sweep_moves_expired_users_offline() {
        let mut mgr = manager_with_instant_expiry();
        mgr.connect(uid(1));
        mgr.connect(uid(2));
        mgr.disconnect(uid(1)).unwrap();
        // User 2 stays connected.

        let offline = mgr.sweep();

        assert_eq!(offline, vec![uid(1)]);
        assert_eq!(mgr.state(&uid(1)), Some(ConnectionState::Offline));
        assert!(mgr.is_connected(&uid(2)));
    }

    #[test]
    fn test_sweep_keeps_users_within_grace() {
        let mut mgr = manager_with_long_grace();
        mgr.connect(uid(1));
        mgr.disconnect(uid(1)).unwrap();

        let offline = mgr.sweep();

        assert!(offline.is_empty());
        assert!(matches!(
            mgr.state(&uid(1)),
            Some(ConnectionState::Reconnecting { .. })
        ));
    }

    #[test]
    fn test_offline_record_is_kept_not_removed() {
        // The record must survive so plate assignments stay valid.
        let mut mgr = manager_with_instant_expiry();
        mgr.connect(uid(1));
        mgr.disconnect(uid(1)).unwrap();
        mgr.sweep();

        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.state(&uid(1)), Some(ConnectionState::Offline));
    }

    #[test]
    fn test_full_lifecycle_connect_drop_reconnect() {
        let mut mgr = manager_with_long_grace();

        assert_eq!(mgr.connect(uid(1)), Attach::Joined);
        mgr.disconnect(uid(1)).unwrap();
        assert_eq!(mgr.connect(uid(1)), Attach::Reconnected);
        assert!(mgr.is_connected(&uid(1)));
    }
}
