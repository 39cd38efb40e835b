//! Peer connection management: engine boundary, webrtc-rs engine and
//! reconnection policy

mod connection;
mod engine;
pub mod lifecycle;

pub use connection::{ice_servers, RtcDataChannel, RtcPeerConnection, WebRtcEngine};
pub use engine::{
    ChannelPayload, DataChannelHandle, EngineEvent, EngineEventSink, GenerationEvent,
    IceCandidate, PeerEngine, PeerHandle, PeerState, SdpKind, VideoCounters,
};
pub use lifecycle::{ReconnectDecision, ReconnectionPolicy, ReconnectionTracker};
