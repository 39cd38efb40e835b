//! Transfer-rate calculation and the published statistics snapshot

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Smoothing factor of the exponential moving average
const RATE_ALPHA: f64 = 0.2;

/// Precision used when comparing float statistics
const STATS_EPSILON: f64 = 0.01;

/// Byte counter with a smoothed KB/s rate
#[derive(Debug, Clone)]
pub struct TransferRateCalculator {
    total_bytes: u64,
    total_packets: u64,
    last_bytes: u64,
    last_update: Instant,
    smoothed: f64,
    current_kbps: f64,
}

impl Default for TransferRateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRateCalculator {
    pub fn new() -> Self {
        Self {
            total_bytes: 0,
            total_packets: 0,
            last_bytes: 0,
            last_update: Instant::now(),
            smoothed: 0.0,
            current_kbps: 0.0,
        }
    }

    /// Account for `bytes` carried in `packets` packets
    pub fn add(&mut self, bytes: u64, packets: u64) {
        self.total_bytes += bytes;
        self.total_packets += packets;
    }

    /// Replace the running totals with counters kept elsewhere
    pub fn set_totals(&mut self, bytes: u64, packets: u64) {
        self.total_bytes = bytes;
        self.total_packets = packets;
    }

    pub fn update_rate(&mut self) {
        self.update_rate_at(Instant::now());
    }

    /// Recompute the rate from the bytes added since the previous update
    ///
    /// The first non-zero sample is taken as-is, later samples are smoothed
    /// with an EMA. The result is rounded to two decimals.
    pub fn update_rate_at(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_update).as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return;
        }

        let bytes = self.total_bytes.saturating_sub(self.last_bytes) as f64;
        let instant = bytes * 1000.0 / 1024.0 / elapsed_ms;

        self.smoothed = if self.smoothed == 0.0 {
            instant
        } else {
            RATE_ALPHA * instant + (1.0 - RATE_ALPHA) * self.smoothed
        };
        self.current_kbps = (self.smoothed * 100.0).round() / 100.0;

        self.last_bytes = self.total_bytes;
        self.last_update = now;
    }

    /// Smoothed rate in KB/s
    pub fn rate_kbps(&self) -> f64 {
        self.current_kbps
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn average_packet_size(&self) -> f64 {
        if self.total_packets == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.total_packets as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Start over from counters that already have a history
    ///
    /// Only bytes counted after this call contribute to the rate.
    pub fn reset_to(&mut self, bytes: u64, packets: u64) {
        self.reset();
        self.total_bytes = bytes;
        self.total_packets = packets;
        self.last_bytes = bytes;
    }
}

/// Statistics snapshot published by the worker
///
/// Equality compares floats at 0.01 precision so that the snapshot is only
/// republished when something visible changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    /// Round-trip time of the selected candidate pair
    pub rtt_ms: u32,
    /// Selected candidate pair description
    pub candidate_pair: Option<String>,
    /// Control channel send rate
    pub sent_kbps: f64,
    /// Control channel receive rate
    pub recv_kbps: f64,
    /// Inbound video rate
    pub video_kbps: f64,
    /// Inbound video packets
    pub video_packets: u64,
    /// Inbound video bytes
    pub video_bytes: u64,
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < STATS_EPSILON
}

impl PartialEq for LinkStats {
    fn eq(&self, other: &Self) -> bool {
        self.rtt_ms == other.rtt_ms
            && self.candidate_pair == other.candidate_pair
            && approx_eq(self.sent_kbps, other.sent_kbps)
            && approx_eq(self.recv_kbps, other.recv_kbps)
            && approx_eq(self.video_kbps, other.video_kbps)
            && self.video_packets == other.video_packets
            && self.video_bytes == other.video_bytes
    }
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RTT: {}ms", self.rtt_ms)?;
        if let Some(pair) = self.candidate_pair.as_deref().filter(|p| !p.is_empty()) {
            write!(f, " [{}]", pair)?;
        }
        write!(
            f,
            ", Sent: {:.2} KB/s, Recv: {:.2} KB/s, Video: {:.2} KB/s ({} packets, {} bytes)",
            self.sent_kbps, self.recv_kbps, self.video_kbps, self.video_packets, self.video_bytes
        )
    }
}
