//! Session worker configuration.

use std::time::Duration;

use mingle_presence::{PresenceConfig, RateLimitConfig};

/// Tunables for one session worker.
///
/// Every session spawned by a [`SessionRegistry`](crate::SessionRegistry)
/// gets a clone of the same config; there is no per-session override
/// surface.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fraction of joined participants whose ready votes advance
    /// `number_assign → icebreaker`. Clamped to `0.0..=1.0` by
    /// [`validated`](Self::validated). Default: 0.6.
    pub quorum: f64,

    /// How long after plates are assigned before the worker casts auto
    /// votes for everyone who has not voted. Default: 60 seconds.
    pub auto_ready_timeout: Duration,

    /// Reconnect grace window, passed through to the presence layer.
    pub presence: PresenceConfig,

    /// How often the worker sweeps expired grace windows.
    /// Default: 5 seconds.
    pub sweep_interval: Duration,

    /// Hard deadline for the closing-message collaborator. Past this the
    /// session ends with a `null` closing message. Default: 10 seconds.
    pub closing_message_timeout: Duration,

    /// How long an ended session stays reachable for trailing
    /// acknowledgements and late resyncs before its worker stops.
    /// Default: 30 seconds.
    pub end_grace: Duration,

    /// Per-connection inbound message rate guard.
    pub rate_limit: RateLimitConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quorum: 0.6,
            auto_ready_timeout: Duration::from_secs(60),
            presence: PresenceConfig::default(),
            sweep_interval: Duration::from_secs(5),
            closing_message_timeout: Duration::from_secs(10),
            end_grace: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        self.quorum = self.quorum.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quorum_is_three_fifths() {
        let config = SessionConfig::default();
        assert!((config.quorum - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validated_clamps_quorum() {
        let config = SessionConfig {
            quorum: 1.7,
            ..SessionConfig::default()
        }
        .validated();
        assert!((config.quorum - 1.0).abs() < f64::EPSILON);

        let config = SessionConfig {
            quorum: -0.3,
            ..SessionConfig::default()
        }
        .validated();
        assert!(config.quorum.abs() < f64::EPSILON);
    }
}
