use std::time::Duration;

use crate::config::RetryConfig;

/// Delay policy between feed connection attempts.
///
/// The delay for attempt `n` (0-indexed) is `delay × factor^n`, clamped to
/// `max_delay`. With the default `factor = 1.0` every retry waits the same
/// fixed delay, and there is no attempt limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            factor: 1.0,
            max_delay: delay,
        }
    }

    /// Computes the delay before the given reconnect attempt.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.delay.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            delay: cfg.delay,
            factor: cfg.factor,
            max_delay: cfg.max_delay.max(cfg.delay),
        }
    }
}

/// Connection lifecycle of the feed reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// About to open a new connection.
    Connecting,
    /// Reading lines from an open connection.
    Connected,
    /// The last `attempt` consecutive connection attempts failed.
    Failed { attempt: u32 },
}
