// ── Reconnect backoff ──
//
// `current` is the delay for the *next* scheduled attempt. After it is
// used it grows to `min(current * 2 + jitter, max_backoff)`, so the
// sequence is non-decreasing until it pins at the cap.

use std::time::Duration;

use crate::config::ReconnectPolicy;

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current: policy.initial_backoff.min(policy.max_backoff),
            policy,
        }
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Hand out the delay for this attempt and grow the next one.
    pub(crate) fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_backoff(delay, jitter(self.policy.max_jitter), self.policy.max_backoff);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.policy.initial_backoff.min(self.policy.max_backoff);
    }
}

/// `min(current * 2 + jitter, max)`.
pub(crate) fn next_backoff(current: Duration, jitter: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).saturating_add(jitter).min(max)
}

/// Uniform jitter in `[0, max]` at millisecond resolution.
fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random::<u64>() % (max_ms.saturating_add(1)))
}
