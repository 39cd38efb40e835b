//! Configuration types for the WebRTC link

use crate::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Port appended to signaling URLs that do not name one
pub const DEFAULT_SIGNALING_PORT: u16 = 3000;

/// Main configuration for a ground-control WebRTC link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Signaling server URL (ws:// or wss://, normalized on connect)
    pub signaling_url: String,

    /// Identity of this link (local id, target peer, ICE servers)
    pub identity: ConnectionIdentity,

    /// Signaling channel keep-alive, polling and backoff
    pub signaling: SignalingOptions,

    /// Peer reconnection policy
    pub reconnect: ReconnectOptions,

    /// Worker timers and teardown limits
    pub options: LinkOptions,
}

/// Immutable per-link identity
///
/// Read-only for the life of a worker; a different identity needs a new worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionIdentity {
    /// Local id announced to the signaling server
    pub gcs_id: String,

    /// Remote peer this link pairs with
    pub target_drone_id: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Descriptive metadata sent with every registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    /// Client model name
    pub model: String,
    /// Firmware / platform identifier
    pub firmware: String,
    /// Software version string
    pub software: String,
}

/// Signaling channel options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingOptions {
    /// Keep-alive ping interval in milliseconds (default: 10000)
    pub ping_interval_ms: u64,

    /// Time to wait for a pong before counting a failure (default: 5000)
    pub pong_timeout_ms: u64,

    /// Consecutive ping failures before the socket is dropped (default: 3)
    pub max_ping_failures: u32,

    /// Peer list polling interval in milliseconds (default: 5000)
    pub peer_poll_interval_ms: u64,

    /// Base reconnection delay in milliseconds (default: 3000)
    pub reconnect_base_ms: u64,

    /// Maximum reconnection delay in milliseconds (default: 30000)
    pub reconnect_max_ms: u64,

    /// Reconnection jitter amplitude in milliseconds (default: 1000)
    pub reconnect_jitter_ms: u64,

    /// Maximum reconnection attempts before giving up (default: 5)
    pub max_reconnect_attempts: u32,

    /// Connections shorter than this are penalized on drop (default: 10000)
    pub short_connection_ms: u64,

    /// Device type announced on registration (default: "gcs")
    pub device_type: String,

    /// Capabilities announced on registration
    pub capabilities: Vec<String>,

    /// Metadata announced on registration
    pub metadata: DeviceMetadata,
}

/// Peer reconnection options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectOptions {
    /// Ordered backoff delays in milliseconds, clamped to the last entry
    pub backoff_table_ms: Vec<u64>,

    /// Random jitter applied to each delay, as a fraction (default: 0.1)
    pub jitter_fraction: f64,

    /// Maximum consecutive attempts before giving up (default: 10)
    pub max_attempts: u32,
}

/// Worker timers and teardown limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Round-trip-time refresh interval in milliseconds (default: 200)
    pub rtt_interval_ms: u64,

    /// Statistics refresh interval in milliseconds (default: 500)
    pub stats_interval_ms: u64,

    /// Grace period after unregistering before resources are released (default: 1000)
    pub cleanup_grace_ms: u64,

    /// Delay before re-registering after a self-pairing conflict (default: 1000)
    pub reregister_delay_ms: u64,

    /// Maximum time to wait for the worker thread on drop (default: 2000)
    pub join_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000".to_string(),
            identity: ConnectionIdentity::default(),
            signaling: SignalingOptions::default(),
            reconnect: ReconnectOptions::default(),
            options: LinkOptions::default(),
        }
    }
}

impl Default for ConnectionIdentity {
    fn default() -> Self {
        Self {
            gcs_id: generate_gcs_id(),
            target_drone_id: String::new(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
        }
    }
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            model: "ground-control".to_string(),
            firmware: std::env::consts::OS.to_string(),
            software: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for SignalingOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: 10_000,
            pong_timeout_ms: 5_000,
            max_ping_failures: 3,
            peer_poll_interval_ms: 5_000,
            reconnect_base_ms: 3_000,
            reconnect_max_ms: 30_000,
            reconnect_jitter_ms: 1_000,
            max_reconnect_attempts: 5,
            short_connection_ms: 10_000,
            device_type: "gcs".to_string(),
            capabilities: vec![
                "telemetry".to_string(),
                "webrtc".to_string(),
                "control".to_string(),
            ],
            metadata: DeviceMetadata::default(),
        }
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            backoff_table_ms: vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000],
            jitter_fraction: 0.1,
            max_attempts: 10,
        }
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            rtt_interval_ms: 200,
            stats_interval_ms: 500,
            cleanup_grace_ms: 1_000,
            reregister_delay_ms: 1_000,
            join_timeout_ms: 2_000,
        }
    }
}

impl ConnectionIdentity {
    /// Create an identity with the default STUN server
    pub fn new(gcs_id: impl Into<String>, target_drone_id: impl Into<String>) -> Self {
        Self {
            gcs_id: gcs_id.into(),
            target_drone_id: target_drone_id.into(),
            ..Default::default()
        }
    }
}

impl LinkOptions {
    pub fn rtt_interval(&self) -> Duration {
        Duration::from_millis(self.rtt_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn reregister_delay(&self) -> Duration {
        Duration::from_millis(self.reregister_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl LinkConfig {
    /// Create a configuration for the given server and target peer
    pub fn new(signaling_url: &str, target_drone_id: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            identity: ConnectionIdentity {
                target_drone_id: target_drone_id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text
    ///
    /// Missing tables and fields fall back to their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse TOML config: {}", e)))
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `gcs_id` or `target_drone_id` is empty, or they are equal
    /// - `signaling_url` cannot be normalized to a ws:// or wss:// URL
    /// - a STUN/TURN URL has the wrong scheme
    /// - the backoff table is empty or `jitter_fraction` is outside 0.0-0.5
    /// - any timer interval is zero
    pub fn validate(&self) -> Result<()> {
        let identity = &self.identity;

        if identity.gcs_id.trim().is_empty() {
            return Err(Error::InvalidConfig("gcs_id must not be empty".to_string()));
        }

        if identity.target_drone_id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "target_drone_id must not be empty".to_string(),
            ));
        }

        if identity.gcs_id == identity.target_drone_id {
            return Err(Error::InvalidConfig(format!(
                "gcs_id and target_drone_id must differ, both are {}",
                identity.gcs_id
            )));
        }

        normalize_signaling_url(&self.signaling_url)?;

        for stun in &identity.stun_servers {
            if !stun.starts_with("stun:") && !stun.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    stun
                )));
            }
        }

        for turn in &identity.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.reconnect.backoff_table_ms.is_empty() {
            return Err(Error::InvalidConfig(
                "backoff_table_ms must contain at least one delay".to_string(),
            ));
        }

        if !(0.0..=0.5).contains(&self.reconnect.jitter_fraction) {
            return Err(Error::InvalidConfig(format!(
                "jitter_fraction must be in range 0.0-0.5, got {}",
                self.reconnect.jitter_fraction
            )));
        }

        let intervals = [
            ("rtt_interval_ms", self.options.rtt_interval_ms),
            ("stats_interval_ms", self.options.stats_interval_ms),
            ("ping_interval_ms", self.signaling.ping_interval_ms),
            ("peer_poll_interval_ms", self.signaling.peer_poll_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }

    /// Create a configuration preset for cellular or otherwise lossy uplinks
    ///
    /// Settings:
    /// - Slower keep-alive (20s) with a longer pong timeout (10s)
    /// - Longer backoff table, up to 60s between attempts
    /// - More reconnection attempts (20)
    ///
    /// # Example
    ///
    /// ```
    /// use gcs_webrtc_link::config::LinkConfig;
    ///
    /// let config = LinkConfig::cellular_preset("wss://signal.example.com", "drone_7");
    /// assert_eq!(config.reconnect.max_attempts, 20);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn cellular_preset(signaling_url: &str, target_drone_id: &str) -> Self {
        let mut config = Self::new(signaling_url, target_drone_id);
        config.signaling.ping_interval_ms = 20_000;
        config.signaling.pong_timeout_ms = 10_000;
        config.reconnect = ReconnectOptions {
            backoff_table_ms: vec![2_000, 4_000, 8_000, 15_000, 30_000, 60_000],
            jitter_fraction: 0.1,
            max_attempts: 20,
        };
        config
    }

    /// Set the local id for this configuration
    pub fn with_gcs_id(mut self, gcs_id: &str) -> Self {
        self.identity.gcs_id = gcs_id.to_string();
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.identity.turn_servers = turn_servers;
        self
    }
}

/// Generate a local id of the form `gcs_` + 8 random alphanumerics
pub fn generate_gcs_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("gcs_{}", suffix)
}

/// Normalize a signaling server URL
///
/// A missing scheme becomes `wss://` and a missing port becomes
/// [`DEFAULT_SIGNALING_PORT`]. Only ws:// and wss:// are accepted.
pub fn normalize_signaling_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidConfig("signaling URL is empty".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("wss://{}", trimmed)
    };

    let mut parsed = url::Url::parse(&with_scheme)
        .map_err(|e| Error::InvalidConfig(format!("Invalid signaling URL {}: {}", raw, e)))?;

    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(Error::InvalidConfig(format!(
            "signaling URL must use ws:// or wss://, got {}",
            raw
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidConfig(format!(
            "signaling URL has no host: {}",
            raw
        )));
    }

    // `Url::port` hides ports equal to the scheme default, so look at the text
    if !has_explicit_port(&with_scheme) {
        parsed
            .set_port(Some(DEFAULT_SIGNALING_PORT))
            .map_err(|_| Error::InvalidConfig(format!("Cannot set port on {}", raw)))?;
    }

    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && !with_scheme.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

fn has_explicit_port(url_text: &str) -> bool {
    let after_scheme = url_text
        .split_once("://")
        .map_or(url_text, |(_, rest)| rest);
    let authority = after_scheme
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();

    match (host_port.rfind(':'), host_port.rfind(']')) {
        (Some(colon), Some(bracket)) => colon > bracket,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_is_valid() {
        let config = LinkConfig::new("ws://localhost:3000", "drone_1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_requires_target() {
        let config = LinkConfig::default();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_generated_gcs_id_format() {
        let id = generate_gcs_id();
        assert!(id.starts_with("gcs_"));
        assert_eq!(id.len(), 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_gcs_id(), generate_gcs_id());
    }

    #[test]
    fn test_same_ids_fail() {
        let config = LinkConfig::new("ws://localhost:3000", "drone_1").with_gcs_id("drone_1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_stun_server_fails() {
        let mut config = LinkConfig::new("ws://localhost:3000", "drone_1");
        config.identity.stun_servers = vec!["turn:turn.example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_turn_server_fails() {
        let config = LinkConfig::new("ws://localhost:3000", "drone_1").with_turn_servers(vec![
            TurnServerConfig {
                url: "stun:example.com".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            },
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_backoff_table_fails() {
        let mut config = LinkConfig::new("ws://localhost:3000", "drone_1");
        config.reconnect.backoff_table_ms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jitter_range() {
        let mut config = LinkConfig::new("ws://localhost:3000", "drone_1");
        config.reconnect.jitter_fraction = 0.6;
        assert!(config.validate().is_err());
        config.reconnect.jitter_fraction = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_fails() {
        let mut config = LinkConfig::new("ws://localhost:3000", "drone_1");
        config.options.stats_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_adds_scheme_and_port() {
        assert_eq!(
            normalize_signaling_url("signal.example.com").unwrap(),
            "wss://signal.example.com:3000"
        );
        assert_eq!(
            normalize_signaling_url("ws://10.0.0.5").unwrap(),
            "ws://10.0.0.5:3000"
        );
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        assert_eq!(
            normalize_signaling_url("ws://localhost:8080").unwrap(),
            "ws://localhost:8080"
        );
        // Explicit default port must not be replaced
        assert_eq!(
            normalize_signaling_url("wss://signal.example.com:443/ws").unwrap(),
            "wss://signal.example.com/ws"
        );
        assert_eq!(
            normalize_signaling_url("ws://[::1]:9000").unwrap(),
            "ws://[::1]:9000"
        );
        assert_eq!(
            normalize_signaling_url("ws://[::1]").unwrap(),
            "ws://[::1]:3000"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_urls() {
        assert!(normalize_signaling_url("").is_err());
        assert!(normalize_signaling_url("   ").is_err());
        assert!(normalize_signaling_url("http://localhost:3000").is_err());
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let text = r#"
            signaling_url = "wss://signal.example.com:3000"

            [identity]
            gcs_id = "gcs_ground01"
            target_drone_id = "drone_42"

            [[identity.turn_servers]]
            url = "turn:turn.example.com:3478"
            username = "user"
            credential = "pass"

            [reconnect]
            max_attempts = 3
        "#;

        let config = LinkConfig::from_toml_str(text).unwrap();
        assert_eq!(config.identity.gcs_id, "gcs_ground01");
        assert_eq!(config.identity.target_drone_id, "drone_42");
        assert_eq!(config.identity.turn_servers.len(), 1);
        assert_eq!(config.reconnect.max_attempts, 3);
        // Unspecified fields keep defaults
        assert_eq!(config.reconnect.backoff_table_ms.len(), 6);
        assert_eq!(config.options.cleanup_grace_ms, 1_000);
        assert_eq!(config.signaling.device_type, "gcs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = LinkConfig::from_toml_str("signaling_url = [").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_cellular_preset() {
        let config = LinkConfig::cellular_preset("wss://signal.example.com", "drone_7")
            .with_gcs_id("gcs_field");
        assert!(config.validate().is_ok());
        assert_eq!(config.identity.gcs_id, "gcs_field");
        assert_eq!(config.signaling.ping_interval_ms, 20_000);
        assert_eq!(config.reconnect.backoff_table_ms.last(), Some(&60_000));
    }
}
