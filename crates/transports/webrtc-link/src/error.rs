//! Error types for the WebRTC link

use crate::worker::WorkerState;

/// Result type alias using the link Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling, peer connection and link operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling protocol or service error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Registration rejected by the signaling server
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// Target peer is already paired with another identity
    #[error("Peer already paired with {0}")]
    AlreadyPaired(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Requested state transition is not in the legality table
    #[error("Illegal state transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// State the caller expected to leave
        from: WorkerState,
        /// Requested target state
        to: WorkerState,
    },

    /// Another transition won the compare-and-swap
    #[error("State transition {expected:?} -> {to:?} lost to concurrent transition (now {actual:?})")]
    TransitionConflict {
        /// State the caller expected
        expected: WorkerState,
        /// State actually observed
        actual: WorkerState,
        /// Requested target state
        to: WorkerState,
    },

    /// The worker thread or service task is gone
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Invalid telemetry or message payload
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::WebSocketError(_)
                | Error::RegistrationFailed(_)
                | Error::PeerConnectionError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error was raised by the state machine guard
    pub fn is_transition_error(&self) -> bool {
        matches!(
            self,
            Error::IllegalTransition { .. } | Error::TransitionConflict { .. }
        )
    }
}
