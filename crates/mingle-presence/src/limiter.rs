//! Per-connection message-rate guard.
//!
//! Every inbound message (except heartbeats) passes through one
//! `RateLimiter` owned by its connection handler, *before* the message
//! reaches any state machine. A violation is answered with a
//! `RATE_LIMITED { retryAfterMs }` notice to the offending sender only,
//! and the message is dropped — over-rate traffic can never corrupt
//! session state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the sliding-window rate limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum messages accepted per window.
    pub max_messages: u32,
    /// Width of the sliding window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            window: Duration::from_secs(1),
        }
    }
}

/// The retry hint returned on a rate-limit violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    /// Milliseconds until the oldest counted message falls out of the
    /// window. Always at least 1 so clients never busy-retry.
    pub ms: u64,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// A sliding-window counter over message arrival instants.
///
/// One instance per connection; not shared, not locked. Memory is
/// bounded by `max_messages` timestamps.
pub struct RateLimiter {
    config: RateLimitConfig,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            stamps: VecDeque::with_capacity(config.max_messages as usize),
        }
    }

    /// Counts one inbound message.
    ///
    /// Returns `Ok(())` when the message is within the allowed rate.
    ///
    /// # Errors
    /// Returns [`RetryAfter`] when the window is full; the message must
    /// be dropped and the hint reported back to the sender.
    pub fn check(&mut self) -> Result<(), RetryAfter> {
        let now = Instant::now();

        // Evict stamps that have slid out of the window.
        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) >= self.config.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }

        if self.stamps.len() < self.config.max_messages as usize {
            self.stamps.push_back(now);
            return Ok(());
        }

        // Window full: the sender may retry once the oldest stamp ages out.
        let oldest = self
            .stamps
            .front()
            .copied()
            .unwrap_or(now);
        let remaining = self
            .config
            .window
            .saturating_sub(now.duration_since(oldest));
        let ms = (remaining.as_millis() as u64).max(1);

        tracing::debug!(retry_after_ms = ms, "rate limit exceeded");
        Err(RetryAfter { ms })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_messages: max,
            window,
        })
    }

    #[test]
    fn test_check_accepts_up_to_max_messages() {
        let mut rl = limiter(3, Duration::from_secs(3600));

        assert!(rl.check().is_ok());
        assert!(rl.check().is_ok());
        assert!(rl.check().is_ok());
    }

    #[test]
    fn test_check_rejects_message_over_limit() {
        let mut rl = limiter(2, Duration::from_secs(3600));
        rl.check().unwrap();
        rl.check().unwrap();

        let result = rl.check();

        assert!(result.is_err());
    }

    #[test]
    fn test_retry_hint_is_positive() {
        let mut rl = limiter(1, Duration::from_secs(10));
        rl.check().unwrap();

        let retry = rl.check().unwrap_err();

        assert!(retry.ms >= 1, "hint must never be zero");
        assert!(retry.ms <= 10_000, "hint can't exceed the window");
    }

    #[test]
    fn test_zero_window_never_limits() {
        // Every stamp ages out instantly.
        let mut rl = limiter(1, Duration::ZERO);
        for _ in 0..50 {
            assert!(rl.check().is_ok());
        }
    }

    #[test]
    fn test_rejected_message_is_not_counted() {
        // A rejected message must not extend the senders' penalty.
        let mut rl = limiter(2, Duration::from_secs(3600));
        rl.check().unwrap();
        rl.check().unwrap();
        rl.check().unwrap_err();
        rl.check().unwrap_err();

        assert_eq!(rl.stamps.len(), 2);
    }
}
