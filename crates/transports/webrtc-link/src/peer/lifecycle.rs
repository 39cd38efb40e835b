//! Peer reconnection policy
//!
//! Delays come from a fixed, ordered backoff table indexed by the zero-based
//! attempt number and clamped to the last entry, with symmetric random jitter.
//! The attempt counter only goes back to zero on a confirmed connection.

use crate::config::ReconnectOptions;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Ordered backoff delays in milliseconds
    pub backoff_table_ms: Vec<u64>,
    /// Jitter as a fraction of the selected delay (default: 0.1)
    pub jitter_fraction: f64,
    /// Maximum number of consecutive attempts (default: 10)
    pub max_attempts: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::from(&ReconnectOptions::default())
    }
}

impl From<&ReconnectOptions> for ReconnectionPolicy {
    fn from(options: &ReconnectOptions) -> Self {
        Self {
            backoff_table_ms: options.backoff_table_ms.clone(),
            jitter_fraction: options.jitter_fraction,
            max_attempts: options.max_attempts,
        }
    }
}

impl ReconnectionPolicy {
    /// Base delay for attempt `n`, without jitter
    ///
    /// Selects `table[min(n, len - 1)]`. An empty table yields zero.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let last = self.backoff_table_ms.len().saturating_sub(1);
        let index = (attempt as usize).min(last);
        Duration::from_millis(self.backoff_table_ms.get(index).copied().unwrap_or(0))
    }

    /// Delay for attempt `n` with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        if self.jitter_fraction <= 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }

        let spread = base * self.jitter_fraction;
        let jittered = base + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(jittered.max(0.0).round() as u64)
    }

    /// Bounds `[low, high]` that [`Self::delay_for`] can return for attempt `n`
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay(attempt).as_millis() as f64;
        let spread = base * self.jitter_fraction.max(0.0);
        (
            Duration::from_millis((base - spread).max(0.0).floor() as u64),
            Duration::from_millis((base + spread).ceil() as u64),
        )
    }

    /// Check if another attempt is allowed after `attempts` consecutive failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Decision taken when the link needs another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then run attempt number `attempt` (1-based)
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted after `attempts` attempts
    GiveUp { attempts: u32 },
}

/// Attempt bookkeeping for one worker
#[derive(Debug, Clone)]
pub struct ReconnectionTracker {
    policy: ReconnectionPolicy,
    attempts: u32,
}

impl ReconnectionTracker {
    pub fn new(policy: ReconnectionPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> &ReconnectionPolicy {
        &self.policy
    }

    /// Consecutive attempts made since the last confirmed connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Register one more attempt and pick its delay
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if !self.policy.should_retry(self.attempts) {
            warn!(
                "Reconnection budget exhausted after {} attempts",
                self.attempts
            );
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;

        info!(
            "Scheduling reconnection attempt {}/{} in {:?}",
            self.attempts, self.policy.max_attempts, delay
        );

        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Confirmed connection: start over
    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            debug!("Reconnected after {} attempts", self.attempts);
        }
        self.attempts = 0;
    }

    /// Manual restart by the user
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> ReconnectionPolicy {
        ReconnectionPolicy {
            jitter_fraction: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconnection_policy_default() {
        let policy = ReconnectionPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff_table_ms.first(), Some(&1000));
        assert_eq!(policy.backoff_table_ms.last(), Some(&30000));
        assert_eq!(policy.jitter_fraction, 0.1);
    }

    #[test]
    fn test_table_backoff() {
        let policy = policy_without_jitter();

        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(30000));
    }

    #[test]
    fn test_backoff_clamps_to_last_entry() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay_for(6), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(1000), Duration::from_millis(30000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = ReconnectionPolicy::default();

        for attempt in 0..8 {
            let (low, high) = policy.delay_bounds(attempt);
            let base = policy.base_delay(attempt);
            assert_eq!(low, base - base / 10);
            assert_eq!(high, base + base / 10);

            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= low && delay <= high, "{:?} outside {:?}..{:?}", delay, low, high);
            }
        }
    }

    #[test]
    fn test_empty_table_yields_zero() {
        let policy = ReconnectionPolicy {
            backoff_table_ms: Vec::new(),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let policy = ReconnectionPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn test_tracker_counts_up_and_gives_up() {
        let mut tracker = ReconnectionTracker::new(ReconnectionPolicy {
            max_attempts: 3,
            ..policy_without_jitter()
        });

        let mut previous = 0;
        for expected in 1..=3 {
            match tracker.next_attempt() {
                ReconnectDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    assert!(attempt > previous);
                    assert_eq!(delay, tracker.policy().base_delay(attempt - 1));
                    previous = attempt;
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(
            tracker.next_attempt(),
            ReconnectDecision::GiveUp { attempts: 3 }
        );
        assert_eq!(tracker.attempts(), 3);
    }

    #[test]
    fn test_tracker_resets_on_connected() {
        let mut tracker = ReconnectionTracker::new(policy_without_jitter());
        tracker.next_attempt();
        tracker.next_attempt();
        assert_eq!(tracker.attempts(), 2);

        tracker.on_connected();
        assert_eq!(tracker.attempts(), 0);
        assert_eq!(
            tracker.next_attempt(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }
}
