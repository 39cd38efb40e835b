//! Signaling wire protocol
//!
//! JSON objects over a WebSocket text stream, discriminated by `type`, with
//! camelCase fields.

use crate::config::{DeviceMetadata, SignalingOptions};
use crate::peer::IceCandidate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Server error codes the client reacts to
pub mod error_codes {
    /// Target peer is already paired (possibly with this identity)
    pub const DRONE_ALREADY_PAIRED: &str = "drone_already_paired";
}

/// One entry of a `drones:list` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    /// Peer id
    pub id: String,
    /// Server-side status (only `connected` peers are considered online)
    #[serde(default)]
    pub status: String,
    /// Whether the peer is paired with a client
    #[serde(default)]
    pub paired: bool,
    /// Client the peer is paired with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_with: Option<String>,
    /// Server-measured round trip time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
}

impl PeerStatus {
    pub fn is_connected(&self) -> bool {
        self.status == "connected"
    }
}

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    /// Register this client and request pairing with `target_id`
    #[serde(rename = "register", rename_all = "camelCase")]
    Register {
        id: String,
        target_id: String,
        #[serde(default)]
        device_type: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<DeviceMetadata>,
    },

    /// Leave the server
    #[serde(rename = "unregister")]
    Unregister { id: String },

    /// Registration outcome
    #[serde(rename = "registered", rename_all = "camelCase")]
    Registered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paired_with: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Unregistration accepted
    #[serde(rename = "unregisteredSuccessfully")]
    UnregisteredSuccessfully { id: String },

    /// Unregistration rejected
    #[serde(rename = "unregisterFailed")]
    UnregisterFailed {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Combined unregistration outcome
    #[serde(rename = "unregistered")]
    Unregistered {
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// SDP offer
    #[serde(rename = "offer")]
    Offer {
        #[serde(default)]
        id: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        sdp: String,
    },

    /// SDP answer
    #[serde(rename = "answer")]
    Answer {
        #[serde(default)]
        id: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        sdp: String,
    },

    /// ICE candidate
    #[serde(rename = "candidate", rename_all = "camelCase")]
    Candidate {
        #[serde(default)]
        id: String,
        #[serde(default)]
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(
            rename = "sdpMLineIndex",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sdp_mline_index: Option<u16>,
    },

    /// Liveness probe
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Liveness reply carrying the probe's timestamp
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// Remote peer left
    #[serde(rename = "peerDisconnected")]
    PeerDisconnected { id: String },

    /// Server-reported error
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        paired_with: Option<String>,
    },

    /// Request the list of online peers
    #[serde(rename = "getDrones")]
    GetDrones,

    /// Online peers reply
    #[serde(rename = "drones:list", rename_all = "camelCase")]
    DronesList {
        #[serde(default)]
        drones: Vec<PeerStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_drones: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Another socket took over this registration
    #[serde(rename = "connectionReplaced")]
    ConnectionReplaced,

    /// Any type this client does not know
    #[serde(other)]
    Unknown,
}

impl SignalingMessage {
    /// Build a registration request
    pub fn register(local_id: &str, target_id: &str, options: &SignalingOptions) -> Self {
        SignalingMessage::Register {
            id: local_id.to_string(),
            target_id: target_id.to_string(),
            device_type: options.device_type.clone(),
            capabilities: options.capabilities.clone(),
            metadata: Some(options.metadata.clone()),
        }
    }

    pub fn unregister(local_id: &str) -> Self {
        SignalingMessage::Unregister {
            id: local_id.to_string(),
        }
    }

    /// Build an SDP answer from `from` to `to`
    pub fn answer(from: &str, to: &str, sdp: String) -> Self {
        SignalingMessage::Answer {
            id: from.to_string(),
            to: to.to_string(),
            sdp,
        }
    }

    /// Build a candidate message from `from` to `to`
    pub fn candidate(from: &str, to: &str, candidate: &IceCandidate) -> Self {
        SignalingMessage::Candidate {
            id: from.to_string(),
            to: to.to_string(),
            candidate: Some(candidate.candidate.clone()),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
        }
    }

    /// Parse a text frame
    ///
    /// Frames that are not JSON objects or carry no `type` are rejected.
    /// Unknown types parse as [`SignalingMessage::Unknown`].
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match value.get("type") {
            Some(serde_json::Value::String(_)) => {}
            Some(_) => return Err(Error::InvalidData("message type is not a string".to_string())),
            None => return Err(Error::InvalidData("message has no type".to_string())),
        }

        serde_json::from_value(value).map_err(Error::from)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Register { .. } => "register",
            SignalingMessage::Unregister { .. } => "unregister",
            SignalingMessage::Registered { .. } => "registered",
            SignalingMessage::UnregisteredSuccessfully { .. } => "unregisteredSuccessfully",
            SignalingMessage::UnregisterFailed { .. } => "unregisterFailed",
            SignalingMessage::Unregistered { .. } => "unregistered",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Ping { .. } => "ping",
            SignalingMessage::Pong { .. } => "pong",
            SignalingMessage::PeerDisconnected { .. } => "peerDisconnected",
            SignalingMessage::Error { .. } => "error",
            SignalingMessage::GetDrones => "getDrones",
            SignalingMessage::DronesList { .. } => "drones:list",
            SignalingMessage::ConnectionReplaced => "connectionReplaced",
            SignalingMessage::Unknown => "unknown",
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_wire_format() {
        let msg = SignalingMessage::register("gcs_abc", "drone_1", &SignalingOptions::default());
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "register");
        assert_eq!(value["id"], "gcs_abc");
        assert_eq!(value["targetId"], "drone_1");
        assert_eq!(value["deviceType"], "gcs");
        assert_eq!(value["capabilities"], json!(["telemetry", "webrtc", "control"]));
        assert!(value["metadata"]["software"].is_string());
    }

    #[test]
    fn test_candidate_wire_format() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let msg = SignalingMessage::candidate("gcs_abc", "drone_1", &candidate);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "candidate",
                "id": "gcs_abc",
                "to": "drone_1",
                "candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            })
        );
    }

    #[test]
    fn test_parse_registered() {
        let msg = SignalingMessage::parse(
            r#"{"type":"registered","success":true,"pairedWith":"drone_1"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Registered {
                id: None,
                success: true,
                paired_with: Some("drone_1".to_string()),
                reason: None,
            }
        );
    }

    #[test]
    fn test_parse_error_with_pairing() {
        let msg = SignalingMessage::parse(
            r#"{"type":"error","code":"drone_already_paired","message":"busy","pairedWith":"gcs_abc"}"#,
        )
        .unwrap();
        match msg {
            SignalingMessage::Error {
                code, paired_with, ..
            } => {
                assert_eq!(code, error_codes::DRONE_ALREADY_PAIRED);
                assert_eq!(paired_with.as_deref(), Some("gcs_abc"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_drones_list() {
        let msg = SignalingMessage::parse(
            r#"{"type":"drones:list","drones":[
                {"id":"drone_1","status":"connected","paired":false,"rtt":12.5},
                {"id":"drone_2","status":"idle","paired":true,"pairedWith":"gcs_x"}
            ],"totalDrones":2,"timestamp":1700000000000}"#,
        )
        .unwrap();

        match msg {
            SignalingMessage::DronesList {
                drones,
                total_drones,
                ..
            } => {
                assert_eq!(drones.len(), 2);
                assert!(drones[0].is_connected());
                assert!(!drones[1].is_connected());
                assert_eq!(drones[1].paired_with.as_deref(), Some("gcs_x"));
                assert_eq!(total_drones, Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_candidate_without_fields_still_parses() {
        let msg = SignalingMessage::parse(r#"{"type":"candidate","id":"drone_1"}"#).unwrap();
        assert!(matches!(
            msg,
            SignalingMessage::Candidate {
                candidate: None,
                sdp_mid: None,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_and_untyped_messages() {
        let msg = SignalingMessage::parse(r#"{"type":"telemetry","x":1}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Unknown);

        let msg = SignalingMessage::parse(r#"{"type":"connectionReplaced","message":"bye"}"#)
            .unwrap();
        assert_eq!(msg, SignalingMessage::ConnectionReplaced);

        assert!(SignalingMessage::parse(r#"{"id":"x"}"#).is_err());
        assert!(SignalingMessage::parse(r#"{"type":5}"#).is_err());
        assert!(SignalingMessage::parse("not json").is_err());
    }

    #[test]
    fn test_get_drones_is_bare() {
        let json = SignalingMessage::GetDrones.to_json().unwrap();
        assert_eq!(json, r#"{"type":"getDrones"}"#);
    }

    #[test]
    fn test_unregister_variants() {
        let ok = SignalingMessage::parse(r#"{"type":"unregisteredSuccessfully","id":"gcs_a"}"#)
            .unwrap();
        assert_eq!(ok.kind(), "unregisteredSuccessfully");

        let combined =
            SignalingMessage::parse(r#"{"type":"unregistered","id":"gcs_a","success":false,"reason":"unknown id"}"#)
                .unwrap();
        assert_eq!(
            combined,
            SignalingMessage::Unregistered {
                id: "gcs_a".to_string(),
                success: false,
                reason: Some("unknown id".to_string()),
            }
        );
    }
}
