//! Link facade tests
//!
//! The facade runs its worker on a dedicated thread, so these tests use real
//! time and poll for the expected state.

mod harness;

use bytes::Bytes;
use gcs_webrtc_link::peer::PeerState;
use gcs_webrtc_link::{Error, LinkEvent, SignalingEvent, SignalingMessage, WebRtcLink, WorkerState};
use harness::{test_config, wait_until, FakeEngine, ScriptedSignaling, DRONE_ID, GCS_ID};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn new_link() -> (WebRtcLink, Arc<ScriptedSignaling>, Arc<FakeEngine>) {
    harness::init_test_tracing();
    let signaling = Arc::new(ScriptedSignaling::new());
    let engine = Arc::new(FakeEngine::new());
    let link = WebRtcLink::with_engine(test_config(), signaling.clone(), engine.clone())
        .expect("link created");
    (link, signaling, engine)
}

async fn pair(signaling: &ScriptedSignaling, engine: &FakeEngine, link: &WebRtcLink) {
    link.connect_link();
    assert!(wait_until(TIMEOUT, || signaling.register_count() == 1).await);

    signaling.inject(SignalingEvent::RegistrationSuccessful {
        id: GCS_ID.to_string(),
        paired_with: Some(DRONE_ID.to_string()),
    });
    assert!(wait_until(TIMEOUT, || engine.created() == 1).await);

    signaling.inject_message(SignalingMessage::Offer {
        id: DRONE_ID.to_string(),
        to: GCS_ID.to_string(),
        sdp: "v=0".to_string(),
    });
    assert!(wait_until(TIMEOUT, || link.state() == WorkerState::EstablishingPeer).await);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let signaling = Arc::new(ScriptedSignaling::new());
    let mut config = test_config();
    config.identity.target_drone_id = GCS_ID.to_string();

    let result = WebRtcLink::with_engine(config, signaling.clone(), Arc::new(FakeEngine::new()));

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert_eq!(signaling.subscriber_count(), 0);
}

#[tokio::test]
async fn test_connect_link_registers() {
    let (link, signaling, _engine) = new_link();
    assert_eq!(signaling.subscriber_count(), 1);
    assert_eq!(link.target(), DRONE_ID);

    link.connect_link();

    assert!(wait_until(TIMEOUT, || signaling.register_count() == 1).await);
    assert!(wait_until(TIMEOUT, || link.state() == WorkerState::Connecting).await);
    assert!(!link.is_connected());
    assert!(!link.is_reconnecting());
}

#[tokio::test]
async fn test_link_carries_bytes() {
    let (link, signaling, engine) = new_link();
    let mut events = link.take_event_receiver().expect("event stream");
    assert!(link.take_event_receiver().is_none());

    pair(&signaling, &engine, &link).await;
    let peer = engine.latest().unwrap();
    let control = peer.open_channel("mavlink");

    assert!(wait_until(TIMEOUT, || link.is_connected()).await);

    link.write_bytes(Bytes::from_static(b"\xfe\x09\x00"));
    assert!(wait_until(TIMEOUT, || control.sent().len() == 1).await);
    assert_eq!(control.sent()[0], Bytes::from_static(b"\xfe\x09\x00"));

    let connected = tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if event == LinkEvent::Connected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(connected);

    assert!(link.status().borrow().starts_with("Connected"));
}

#[tokio::test]
async fn test_peer_loss_reports_reconnecting() {
    let (link, signaling, engine) = new_link();
    pair(&signaling, &engine, &link).await;
    let peer = engine.latest().unwrap();
    peer.open_channel("mavlink");
    assert!(wait_until(TIMEOUT, || link.is_connected()).await);

    peer.set_state(PeerState::Failed);

    assert!(wait_until(TIMEOUT, || link.is_reconnecting()).await);
    assert!(!link.is_connected());
    assert_eq!(signaling.unregister_count(), 1);
}

#[tokio::test]
async fn test_disconnect_is_not_connected_immediately() {
    let (link, signaling, engine) = new_link();
    pair(&signaling, &engine, &link).await;
    engine.latest().unwrap().open_channel("mavlink");
    assert!(wait_until(TIMEOUT, || link.is_connected()).await);

    link.disconnect();

    assert!(wait_until(TIMEOUT, || !link.is_connected()).await);
    assert!(wait_until(TIMEOUT, || link.state() == WorkerState::Idle).await);
}

#[tokio::test]
async fn test_drop_tears_down() {
    let (link, signaling, engine) = new_link();
    pair(&signaling, &engine, &link).await;
    let peer = engine.latest().unwrap();

    drop(link);

    assert_eq!(signaling.subscriber_count(), 0);
    assert!(peer.is_closed());
    assert_eq!(signaling.unregister_count(), 1);
}
