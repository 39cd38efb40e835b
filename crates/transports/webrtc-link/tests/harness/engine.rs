//! Fake peer engine

use async_trait::async_trait;
use bytes::Bytes;
use gcs_webrtc_link::peer::{
    ChannelPayload, DataChannelHandle, EngineEvent, EngineEventSink, IceCandidate, PeerEngine,
    PeerHandle, PeerState, SdpKind, VideoCounters,
};
use gcs_webrtc_link::{ConnectionIdentity, Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

/// Engine that hands out [`FakePeer`]s and keeps them for inspection
#[derive(Default)]
pub struct FakeEngine {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail_create: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peer connections created so far
    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peer(&self, index: usize) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(index).cloned()
    }

    pub fn latest(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn create_peer(
        &self,
        _identity: &ConnectionIdentity,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerHandle>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError("engine refused".to_string()));
        }

        let index = self.peers.lock().len();
        let peer = Arc::new(FakePeer::new(format!("fake-pc-{}", index), events));
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

/// Peer connection that records what is applied to it
pub struct FakePeer {
    id: String,
    sink: EngineEventSink,
    state: Mutex<PeerState>,
    remote_descriptions: Mutex<Vec<(SdpKind, String)>>,
    candidates: Mutex<Vec<IceCandidate>>,
    rtt_ms: Mutex<Option<f64>>,
    counters: Mutex<VideoCounters>,
    candidate_pair: Mutex<Option<String>>,
    fail_remote_description: AtomicBool,
    closed: AtomicBool,
}

impl FakePeer {
    fn new(id: String, sink: EngineEventSink) -> Self {
        Self {
            id,
            sink,
            state: Mutex::new(PeerState::New),
            remote_descriptions: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            rtt_ms: Mutex::new(None),
            counters: Mutex::new(VideoCounters::default()),
            candidate_pair: Mutex::new(None),
            fail_remote_description: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    /// Change state and report it like the engine would
    pub fn set_state(&self, state: PeerState) {
        *self.state.lock() = state;
        self.sink.emit(EngineEvent::StateChanged(state));
    }

    /// Announce a remote data channel and open it
    pub fn open_channel(&self, label: &str) -> Arc<FakeChannel> {
        let channel = Arc::new(FakeChannel::new(label));
        self.sink.emit(EngineEvent::DataChannel(channel.clone()));
        channel.open.store(true, Ordering::SeqCst);
        self.sink.emit(EngineEvent::ChannelOpen {
            label: label.to_string(),
        });
        channel
    }

    pub fn close_channel(&self, channel: &FakeChannel) {
        channel.open.store(false, Ordering::SeqCst);
        self.sink.emit(EngineEvent::ChannelClosed {
            label: channel.label.clone(),
        });
    }

    /// Deliver a message as if it came from the remote side
    pub fn deliver(&self, label: &str, payload: ChannelPayload) {
        self.sink.emit(EngineEvent::ChannelMessage {
            label: label.to_string(),
            payload,
        });
    }

    pub fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    pub fn set_rtt(&self, rtt_ms: Option<f64>) {
        *self.rtt_ms.lock() = rtt_ms;
    }

    pub fn set_counters(&self, counters: VideoCounters) {
        *self.counters.lock() = counters;
    }

    pub fn set_candidate_pair(&self, pair: Option<&str>) {
        *self.candidate_pair.lock() = pair.map(str::to_string);
    }

    pub fn fail_remote_description(&self, fail: bool) {
        self.fail_remote_description.store(fail, Ordering::SeqCst);
    }

    pub fn remote_descriptions(&self) -> Vec<(SdpKind, String)> {
        self.remote_descriptions.lock().clone()
    }

    /// Candidates applied, in order
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError("rejected by fake engine".to_string()));
        }

        self.remote_descriptions.lock().push((kind, sdp));
        if kind == SdpKind::Offer {
            self.sink.emit(EngineEvent::LocalDescription {
                kind: SdpKind::Answer,
                sdp: ANSWER_SDP.to_string(),
            });
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        assert!(
            !self.remote_descriptions.lock().is_empty(),
            "candidate applied before remote description"
        );
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn round_trip_time_ms(&self) -> Option<f64> {
        *self.rtt_ms.lock()
    }

    fn selected_candidate_pair(&self) -> Option<String> {
        self.candidate_pair.lock().clone()
    }

    fn video_counters(&self) -> VideoCounters {
        *self.counters.lock()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = PeerState::Closed;
        Ok(())
    }
}

/// Data channel that records what is sent on it
pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    texts: Mutex<Vec<String>>,
    send_calls: AtomicUsize,
}

impl FakeChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    /// Send attempts, including ones on a closed channel
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannelHandle for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, data: Bytes) -> Result<usize> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            return Err(Error::DataChannelError("channel closed".to_string()));
        }
        let len = data.len();
        self.sent.lock().push(data);
        Ok(len)
    }

    async fn send_text(&self, text: String) -> Result<usize> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            return Err(Error::DataChannelError("channel closed".to_string()));
        }
        let len = text.len();
        self.texts.lock().push(text);
        Ok(len)
    }
}
