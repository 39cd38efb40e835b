//! Signaling: wire protocol, shared channel service and its socket transport

pub mod backoff;
pub mod channel;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use channel::{
    ConnectionStatus, SignalingChannel, SignalingEvent, SignalingService, SubscriptionId,
};
pub use protocol::{error_codes, PeerStatus, SignalingMessage};
pub use registry::PeerRegistry;
pub use transport::{InboundFrame, TungsteniteConnector, WsConnection, WsConnector};
