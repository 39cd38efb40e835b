//! Peer connection engine boundary
//!
//! The connection worker never touches webrtc-rs directly. It asks a
//! [`PeerEngine`] for a [`PeerHandle`] and receives everything the engine
//! reports (state changes, local SDP, local candidates, data channels and
//! their traffic) as plain [`EngineEvent`] values stamped with the generation
//! of the peer connection that produced them.

use crate::config::ConnectionIdentity;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Negotiation is in progress or done; a new offer is a duplicate
    pub fn is_active(self) -> bool {
        matches!(self, PeerState::Connecting | PeerState::Connected)
    }

    /// The connection is lost and the peer must be rebuilt
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

/// Payload of a data channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Binary(Bytes),
    Text(String),
}

impl ChannelPayload {
    pub fn len(&self) -> usize {
        match self {
            ChannelPayload::Binary(data) => data.len(),
            ChannelPayload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inbound video counters accumulated by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoCounters {
    /// RTP packets received
    pub packets: u64,
    /// RTP payload bytes received
    pub bytes: u64,
}

/// Everything the engine reports back to the worker
pub enum EngineEvent {
    /// Peer connection state change
    StateChanged(PeerState),
    /// Local description generated (the answer to an applied offer)
    LocalDescription { kind: SdpKind, sdp: String },
    /// Local ICE candidate gathered
    LocalCandidate(IceCandidate),
    /// Remote side opened a data channel
    DataChannel(Arc<dyn DataChannelHandle>),
    /// Data channel opened
    ChannelOpen { label: String },
    /// Data channel closed
    ChannelClosed { label: String },
    /// Data channel reported an error
    ChannelError { label: String, error: String },
    /// Data channel message received
    ChannelMessage {
        label: String,
        payload: ChannelPayload,
    },
    /// Remote media track added
    Track { kind: String, id: String },
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            EngineEvent::LocalDescription { kind, sdp } => f
                .debug_struct("LocalDescription")
                .field("kind", kind)
                .field("sdp_len", &sdp.len())
                .finish(),
            EngineEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            EngineEvent::DataChannel(channel) => f
                .debug_struct("DataChannel")
                .field("label", &channel.label())
                .finish(),
            EngineEvent::ChannelOpen { label } => {
                f.debug_struct("ChannelOpen").field("label", label).finish()
            }
            EngineEvent::ChannelClosed { label } => {
                f.debug_struct("ChannelClosed").field("label", label).finish()
            }
            EngineEvent::ChannelError { label, error } => f
                .debug_struct("ChannelError")
                .field("label", label)
                .field("error", error)
                .finish(),
            EngineEvent::ChannelMessage { label, payload } => f
                .debug_struct("ChannelMessage")
                .field("label", label)
                .field("len", &payload.len())
                .finish(),
            EngineEvent::Track { kind, id } => f
                .debug_struct("Track")
                .field("kind", kind)
                .field("id", id)
                .finish(),
        }
    }
}

/// Engine event tagged with the peer connection generation that produced it
pub type GenerationEvent = (u64, EngineEvent);

/// Where engine callbacks post their events
///
/// Each peer connection gets a sink stamped with its generation. The worker
/// drops events whose generation is no longer current.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<GenerationEvent>,
}

impl EngineEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<GenerationEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event; returns false once the worker is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Data channel capability
#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// The channel is open and can carry messages
    fn is_open(&self) -> bool;

    /// Send binary data, returning the number of bytes written
    async fn send(&self, data: Bytes) -> Result<usize>;

    /// Send a text message, returning the number of bytes written
    async fn send_text(&self, text: String) -> Result<usize>;
}

/// One peer connection owned by the engine
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Unique id of this connection instance (for logging)
    fn connection_id(&self) -> &str;

    /// Last state reported by the engine
    fn state(&self) -> PeerState;

    /// Apply a remote description
    ///
    /// For an offer the engine also creates and applies the local answer and
    /// reports it as [`EngineEvent::LocalDescription`].
    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Current round-trip time of the selected candidate pair
    async fn round_trip_time_ms(&self) -> Option<f64>;

    /// Cached description of the selected candidate pair
    fn selected_candidate_pair(&self) -> Option<String>;

    /// Inbound video counters
    fn video_counters(&self) -> VideoCounters;

    /// Close the connection and release engine resources
    async fn close(&self) -> Result<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Create a peer connection configured for `identity`
    async fn create_peer(
        &self,
        identity: &ConnectionIdentity,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_wire_format() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_peer_state_classes() {
        assert!(PeerState::Connecting.is_active());
        assert!(PeerState::Connected.is_active());
        assert!(!PeerState::New.is_active());
        assert!(PeerState::Failed.is_degraded());
        assert!(PeerState::Closed.is_degraded());
        assert!(!PeerState::Connecting.is_degraded());
    }

    #[test]
    fn test_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(7, tx);

        assert!(sink.emit(EngineEvent::StateChanged(PeerState::Connected)));
        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, EngineEvent::StateChanged(PeerState::Connected)));

        drop(rx);
        assert!(!sink.emit(EngineEvent::StateChanged(PeerState::Closed)));
    }
}
