use std::time::Duration;

/// Delay between reconnect attempts against the upstream relay and gpsd.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Reconnect schedule: fixed or capped-exponential delays, optionally
/// giving up after a number of consecutive failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_attempts: Option<u32>,
    attempts: u32,
    current: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        ReconnectPolicy::exponential(delay, delay, 1.0)
    }

    /// Delays start at `initial` and grow by `multiplier` up to `max`.
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        ReconnectPolicy {
            initial,
            max: max.max(initial),
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 { multiplier } else { 1.0 },
            max_attempts: None,
            attempts: 0,
            current: initial,
        }
    }

    /// Give up once `attempts` consecutive failures have been recorded.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one failure and return how long to wait before retrying, or
    /// `None` when the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        Some(delay)
    }

    /// Back to the first delay; called after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.initial;
    }
}
