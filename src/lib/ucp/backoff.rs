//! Reconnect delays for the upstream connection.
use std::time::Duration;

use rand::Rng;

/// Doubling delay between reconnect attempts, capped at `max`.
///
/// Each delay is scaled by a random factor in `[0.5, 1.0]` so several pools restarting together
/// don't hit the node at the same instant.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max: max.max(initial),
        }
    }

    /// Returns the next jittered delay and advances the nominal one.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        nominal.mul_f64(jitter)
    }

    /// Back to the initial delay, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
