//! Signaling socket reconnection backoff
//!
//! Linear growth for the first attempts, exponential afterwards, capped and
//! jittered by a fixed amplitude. Connections that die young are penalized.

use crate::config::SignalingOptions;
use rand::Rng;
use std::time::Duration;

/// Backoff state for the signaling socket
#[derive(Debug, Clone)]
pub struct SignalingBackoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ms: u64,
    max_attempts: u32,
    short_connection: Duration,
    attempts: u32,
}

impl SignalingBackoff {
    pub fn new(options: &SignalingOptions) -> Self {
        Self {
            base_ms: options.reconnect_base_ms,
            max_ms: options.reconnect_max_ms,
            jitter_ms: options.reconnect_jitter_ms,
            max_attempts: options.max_reconnect_attempts,
            short_connection: Duration::from_millis(options.short_connection_ms),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before attempt `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let ms = if attempt <= 3 {
            self.base_ms + attempt as u64 * 2_000
        } else {
            let shift = (attempt - 2).min(16);
            self.base_ms.saturating_mul(1u64 << shift)
        };
        Duration::from_millis(ms.min(self.max_ms))
    }

    /// Jittered delay for attempt `attempt`, never below the base delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as i64;
        let jitter = self.jitter_ms as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };
        let ms = (base + offset).max(self.base_ms as i64);
        Duration::from_millis(ms as u64)
    }

    /// Count one more attempt; `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    /// Penalize a connection that dropped after living only `lifetime`
    pub fn penalize_short_connection(&mut self, lifetime: Duration) -> bool {
        if lifetime < self.short_connection {
            self.attempts = (self.attempts + 2).min(self.max_attempts);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
