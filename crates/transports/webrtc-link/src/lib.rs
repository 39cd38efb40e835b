//! WebRTC data link for ground-control clients
//!
//! This crate pairs a ground-control station with a remote module through a
//! WebSocket signaling server and carries link bytes over a WebRTC data
//! channel.
//!
//! # Features
//!
//! - **Shared signaling channel**: one socket per process with keep-alive,
//!   peer-list polling, remembered registrations and backoff reconnection
//! - **Connection worker**: per-link state machine with CAS-guarded
//!   transitions, ICE candidate gating and bounded reconnection
//! - **Data channels**: reliable control channel for link bytes, secondary
//!   JSON channel for remote telemetry
//! - **Statistics**: RTT, candidate pair and smoothed transfer rates
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Application                                           │
//! │  ↓ (write_bytes / LinkEvent stream / status watch)     │
//! │  WebRtcLink (facade, caller's thread)                  │
//! │  ↓ WorkerCommand queue                                 │
//! │  ConnectionWorker (dedicated thread, current_thread)   │
//! │  ├─ PeerConnectionContext (one per attempt)            │
//! │  │   ├─ PeerHandle (webrtc-rs engine)                 │
//! │  │   ├─ control + custom data channels                │
//! │  │   └─ CandidateGate                                 │
//! │  └─ ReconnectionTracker                                │
//! │     ↕ SignalingService (subscribe / register / send)   │
//! │  SignalingChannel (shared task, WebSocket)             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gcs_webrtc_link::{LinkConfig, LinkEvent, SignalingChannel, WebRtcLink};
//! use std::sync::Arc;
//!
//! let config = LinkConfig::new("ws://signal.example.net", "drone-42");
//! let signaling = SignalingChannel::new(config.signaling.clone());
//! signaling.connect(&config.signaling_url);
//!
//! let link = WebRtcLink::new(config, Arc::new(signaling.clone()))?;
//! let mut events = link.take_event_receiver().unwrap();
//! link.connect_link();
//!
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::BytesReceived(bytes) = event {
//!         println!("{} bytes", bytes.len());
//!     }
//! }
//! ```

#![warn(clippy::all)]

// Public modules
pub mod config;
pub mod error;
pub mod link;
pub mod peer;
pub mod signaling;
pub mod worker;

// Re-exports for public API
pub use config::{
    generate_gcs_id, normalize_signaling_url, ConnectionIdentity, LinkConfig, LinkOptions,
    ReconnectOptions, SignalingOptions, TurnServerConfig,
};
pub use error::{Error, Result};
pub use link::WebRtcLink;
pub use signaling::{
    ConnectionStatus, SignalingChannel, SignalingEvent, SignalingMessage, SignalingService,
};
pub use worker::{LinkEvent, LinkStats, WorkerState};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
