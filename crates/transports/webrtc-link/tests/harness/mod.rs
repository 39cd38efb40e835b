//! Test doubles for link integration tests
//!
//! - [`ScriptedSignaling`]: in-memory [`SignalingService`] that records calls
//!   and lets the test inject events
//! - [`FakeEngine`]: peer engine whose peers record what the worker applies
//!   and let the test drive engine events
//! - [`SignalingServer`]: local WebSocket server for the real signaling channel

#![allow(dead_code)]

mod engine;
mod server;
mod signaling;

pub use engine::{FakeChannel, FakeEngine, FakePeer, ANSWER_SDP};
pub use server::SignalingServer;
pub use signaling::{ScriptedSignaling, SignalingCall};

use gcs_webrtc_link::LinkConfig;
use std::time::Duration;

pub const GCS_ID: &str = "gcs_test0001";
pub const DRONE_ID: &str = "drone-7";

/// Link configuration with fixed ids
pub fn test_config() -> LinkConfig {
    LinkConfig::new("ws://127.0.0.1:3000", DRONE_ID).with_gcs_id(GCS_ID)
}

/// Initialize tracing for tests (safe to call more than once)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,gcs_webrtc_link=debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run; with paused time this also advances the clock
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
