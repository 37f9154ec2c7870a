// ABOUTME: Capped exponential backoff between reconnect attempts.
// ABOUTME: Reset after every successful session open.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            next: config.initial.min(config.max),
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; grows until it reaches the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay
            .checked_mul(self.config.multiplier.max(1))
            .unwrap_or(self.config.max)
            .min(self.config.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial.min(self.config.max);
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
