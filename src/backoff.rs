//! Exponential backoff gate for reconnection attempts

use std::time::{Duration, Instant};

/// Gate that spaces out reconnection attempts.
///
/// Every failed attempt doubles the delay up to a cap; a success restores
/// the base delay. An attempt is only permitted once the current delay has
/// elapsed since the previous attempt started.
///
/// # Examples
///
/// ```
/// use resilient_pool::ReconnectBackoff;
/// use std::time::Duration;
///
/// let mut backoff = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
/// assert!(backoff.remaining().is_none());
///
/// backoff.begin_attempt();
/// backoff.record_failure();
/// assert_eq!(backoff.current_delay(), Duration::from_secs(2));
///
/// // Too soon for another attempt
/// assert!(backoff.remaining().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn base_delay(&self) -> Duration {
        self.base
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time left before the next attempt is permitted, `None` if allowed now
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        let last = self.last_attempt?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.current {
            None
        } else {
            Some(self.current - elapsed)
        }
    }

    /// Stamp the start of an attempt
    pub fn begin_attempt(&mut self) {
        self.last_attempt = Some(Instant::now());
    }

    /// Double the delay, capped at the maximum. Returns the new delay.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current = self.base;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}
