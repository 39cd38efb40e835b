//! Out-of-band telemetry carried on the secondary data channel

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Remote module host metrics (`system_info`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    pub cpu_usage: f64,
    pub cpu_temperature: f64,
    #[serde(rename = "memory_usage_percent")]
    pub memory_usage: f64,
    pub network_rx_mbps: f64,
    pub network_tx_mbps: f64,
    pub network_interface: String,
}

impl SystemInfo {
    pub fn is_valid(&self) -> bool {
        (0.0..=100.0).contains(&self.cpu_usage)
            && (-50.0..=150.0).contains(&self.cpu_temperature)
            && (0.0..=100.0).contains(&self.memory_usage)
            && self.network_rx_mbps >= 0.0
            && self.network_tx_mbps >= 0.0
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.1}%, Temp: {:.1}°C, Mem: {:.1}%, Net: {:.2}/{:.2} Mbps ({})",
            self.cpu_usage,
            self.cpu_temperature,
            self.memory_usage,
            self.network_rx_mbps,
            self.network_tx_mbps,
            self.network_interface
        )
    }
}

/// Per-second counters of the remote video pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoRates {
    pub rtsp_packets_ps: f64,
    pub decoded_frames_ps: f64,
    pub encoded_frames_ps: f64,
    pub tee_frames_ps: f64,
    pub srt_frames_ps: f64,
    pub rtp_frames_ps: f64,
}

/// Remote video pipeline metrics (`video_metrics`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMetrics {
    pub timestamp: i64,
    pub per_second: VideoRates,
}

impl VideoMetrics {
    pub fn is_valid(&self) -> bool {
        let rates = &self.per_second;
        self.timestamp > 0
            && [
                rates.rtsp_packets_ps,
                rates.decoded_frames_ps,
                rates.encoded_frames_ps,
                rates.tee_frames_ps,
                rates.srt_frames_ps,
                rates.rtp_frames_ps,
            ]
            .iter()
            .all(|v| *v >= 0.0)
    }
}

impl fmt::Display for VideoMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rates = &self.per_second;
        write!(
            f,
            "RTSP: {:.1} pkt/s, Decoded: {:.1} fps, Encoded: {:.1} fps, RTP: {:.1} fps",
            rates.rtsp_packets_ps,
            rates.decoded_frames_ps,
            rates.encoded_frames_ps,
            rates.rtp_frames_ps
        )
    }
}

/// Remote module version report (`version_check`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: String,
    pub timestamp: i64,
    /// Derived from the two versions after parsing
    #[serde(skip)]
    pub update_available: bool,
}

impl VersionInfo {
    pub fn is_valid(&self) -> bool {
        !self.current_version.is_empty() && !self.latest_version.is_empty() && self.timestamp > 0
    }
}

/// Compare dotted version strings numerically
///
/// Missing components count as zero, as do components that are not numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parts_a: Vec<&str> = a.split('.').collect();
    let parts_b: Vec<&str> = b.split('.').collect();
    let component = |parts: &[&str], i: usize| -> i64 {
        parts
            .get(i)
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };

    for i in 0..parts_a.len().max(parts_b.len()) {
        match component(&parts_a, i).cmp(&component(&parts_b, i)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// A validated telemetry report
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    SystemInfo(SystemInfo),
    VideoMetrics(VideoMetrics),
    VersionCheck(VersionInfo),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawTelemetry {
    SystemInfo(SystemInfo),
    VideoMetrics(VideoMetrics),
    VersionCheck(VersionInfo),
    #[serde(other)]
    Unknown,
}

impl Telemetry {
    /// Parse and validate one secondary-channel message
    ///
    /// Unknown types, malformed JSON and out-of-range values are all
    /// [`Error::InvalidData`].
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawTelemetry = serde_json::from_str(text)
            .map_err(|e| Error::InvalidData(format!("Malformed telemetry: {}", e)))?;

        match raw {
            RawTelemetry::SystemInfo(info) if info.is_valid() => Ok(Telemetry::SystemInfo(info)),
            RawTelemetry::SystemInfo(info) => Err(Error::InvalidData(format!(
                "system_info out of range: {}",
                info
            ))),
            RawTelemetry::VideoMetrics(metrics) if metrics.is_valid() => {
                Ok(Telemetry::VideoMetrics(metrics))
            }
            RawTelemetry::VideoMetrics(_) => {
                Err(Error::InvalidData("video_metrics out of range".to_string()))
            }
            RawTelemetry::VersionCheck(mut version) if version.is_valid() => {
                version.update_available =
                    compare_versions(&version.current_version, &version.latest_version)
                        == Ordering::Less;
                Ok(Telemetry::VersionCheck(version))
            }
            RawTelemetry::VersionCheck(_) => {
                Err(Error::InvalidData("version_check incomplete".to_string()))
            }
            RawTelemetry::Unknown => Err(Error::InvalidData("unknown telemetry type".to_string())),
        }
    }
}
