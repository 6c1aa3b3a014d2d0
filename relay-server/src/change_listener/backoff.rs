use rand::Rng;
use std::time::Duration;

const MULTIPLIER: f64 = 2.0;
const JITTER: f64 = 0.2;

/// Doubling reconnect delay with ±20% jitter, never above `max`.
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        ExponentialBackoff {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
        let delay = self.current.mul_f64(factor).min(self.max);
        self.current = self.current.mul_f64(MULTIPLIER).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
