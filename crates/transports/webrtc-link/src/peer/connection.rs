//! webrtc-rs backed peer engine
//!
//! Every callback registered on the `RTCPeerConnection` (state change, ICE
//! candidate, data channel, track) converts what it sees into an
//! [`EngineEvent`] and posts it to the worker. Callbacks never touch worker
//! state.

use super::engine::{
    ChannelPayload, DataChannelHandle, EngineEvent, EngineEventSink, IceCandidate, PeerEngine,
    PeerHandle, PeerState, SdpKind, VideoCounters,
};
use crate::config::ConnectionIdentity;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

/// Peer engine backed by webrtc-rs
#[derive(Debug, Default, Clone)]
pub struct WebRtcEngine;

impl WebRtcEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Build the ICE server list from the link identity
pub fn ice_servers(identity: &ConnectionIdentity) -> Vec<RTCIceServer> {
    identity
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(identity.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    #[instrument(skip(self, identity, events), fields(gcs_id = %identity.gcs_id, generation = events.generation()))]
    async fn create_peer(
        &self,
        identity: &ConnectionIdentity,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerHandle>> {
        let connection = RtcPeerConnection::new(identity, events).await?;
        Ok(Arc::new(connection))
    }
}

/// One webrtc-rs peer connection
pub struct RtcPeerConnection {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    events: EngineEventSink,
    candidate_pair: Arc<Mutex<Option<String>>>,
    video_packets: Arc<AtomicU64>,
    video_bytes: Arc<AtomicU64>,
}

impl RtcPeerConnection {
    /// Create the connection and register all engine callbacks
    pub async fn new(identity: &ConnectionIdentity, events: EngineEventSink) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer connection: target={}, connection_id={}",
            identity.target_drone_id, connection_id
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(identity),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        let connection = Self {
            connection_id,
            peer_connection,
            events,
            candidate_pair: Arc::new(Mutex::new(None)),
            video_packets: Arc::new(AtomicU64::new(0)),
            video_bytes: Arc::new(AtomicU64::new(0)),
        };

        connection.register_state_handler();
        connection.register_candidate_handler();
        connection.register_data_channel_handler();
        connection.register_track_handler();

        Ok(connection)
    }

    fn register_state_handler(&self) {
        let events = self.events.clone();
        let candidate_pair = Arc::clone(&self.candidate_pair);
        let weak_pc: Weak<RTCPeerConnection> = Arc::downgrade(&self.peer_connection);
        let connection_id = self.connection_id.clone();

        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = events.clone();
                let candidate_pair = Arc::clone(&candidate_pair);
                let weak_pc = weak_pc.clone();
                let connection_id = connection_id.clone();

                Box::pin(async move {
                    let state = map_state(s);
                    debug!("Peer connection {} state: {:?}", connection_id, state);

                    match state {
                        PeerState::Connected => {
                            if let Some(pc) = weak_pc.upgrade() {
                                let description = describe_selected_pair(&pc).await;
                                *candidate_pair.lock() = description;
                            }
                        }
                        s if s.is_degraded() => {
                            *candidate_pair.lock() = None;
                        }
                        _ => {}
                    }

                    events.emit(EngineEvent::StateChanged(state));
                })
            }));
    }

    fn register_candidate_handler(&self) {
        let events = self.events.clone();

        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();

                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };

                    match candidate.to_json() {
                        Ok(init) => {
                            events.emit(EngineEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }));
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));
    }

    fn register_data_channel_handler(&self) {
        let events = self.events.clone();

        self.peer_connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = events.clone();

                Box::pin(async move {
                    let label = channel.label().to_string();
                    info!("Data channel announced: label={}, id={}", label, channel.id());

                    // Announce before wiring callbacks so the worker knows the
                    // channel by the time its open event arrives
                    let handle: Arc<dyn DataChannelHandle> = Arc::new(RtcDataChannel {
                        label,
                        channel: Arc::clone(&channel),
                    });
                    events.emit(EngineEvent::DataChannel(handle));

                    register_channel_callbacks(&channel, &events);
                })
            }));
    }

    fn register_track_handler(&self) {
        let events = self.events.clone();
        let packets = Arc::clone(&self.video_packets);
        let bytes = Arc::clone(&self.video_bytes);

        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let events = events.clone();
                let packets = Arc::clone(&packets);
                let bytes = Arc::clone(&bytes);

                Box::pin(async move {
                    let kind = track.kind().to_string();
                    let id = track.id();
                    info!("Remote track added: kind={}, id={}", kind, id);
                    events.emit(EngineEvent::Track {
                        kind: kind.clone(),
                        id,
                    });

                    if kind != "video" {
                        return;
                    }

                    tokio::spawn(async move {
                        while let Ok((packet, _)) = track.read_rtp().await {
                            packets.fetch_add(1, Ordering::Relaxed);
                            bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                        }
                        debug!("Video track reader finished");
                    });
                })
            },
        ));
    }
}

fn register_channel_callbacks(channel: &Arc<RTCDataChannel>, events: &EngineEventSink) {
    let label = channel.label().to_string();

    {
        let events = events.clone();
        let label = label.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                debug!("Data channel '{}' opened", label);
                events.emit(EngineEvent::ChannelOpen { label });
            })
        }));
    }

    {
        let events = events.clone();
        let label = label.clone();
        channel.on_close(Box::new(move || {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' closed", label);
                events.emit(EngineEvent::ChannelClosed { label });
            })
        }));
    }

    {
        let events = events.clone();
        let label = label.clone();
        channel.on_error(Box::new(move |err| {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                events.emit(EngineEvent::ChannelError {
                    label,
                    error: err.to_string(),
                });
            })
        }));
    }

    {
        let events = events.clone();
        channel.on_message(Box::new(move |msg| {
            let events = events.clone();
            let label = label.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    ChannelPayload::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    ChannelPayload::Binary(msg.data)
                };
                events.emit(EngineEvent::ChannelMessage { label, payload });
            })
        }));
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

/// Describe the nominated candidate pair as `local ↔ remote [type]`
async fn describe_selected_pair(pc: &RTCPeerConnection) -> Option<String> {
    let report = pc.get_stats().await;

    let pair = report.reports.values().find_map(|r| match r {
        StatsReportType::CandidatePair(pair) if pair.nominated => Some(pair),
        _ => None,
    })?;

    let local = report.reports.get(&pair.local_candidate_id)?;
    let remote = report.reports.get(&pair.remote_candidate_id)?;

    match (local, remote) {
        (StatsReportType::LocalCandidate(l), StatsReportType::RemoteCandidate(r)) => Some(format!(
            "{}:{} ↔ {}:{} [{}]",
            l.ip, l.port, r.ip, r.port, l.candidate_type
        )),
        _ => None,
    }
}

#[async_trait]
impl PeerHandle for RtcPeerConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn state(&self) -> PeerState {
        map_state(self.peer_connection.connection_state())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        debug!(
            "Setting remote {} on connection {}",
            kind, self.connection_id
        );

        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse {}: {}", kind, e)))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        if kind == SdpKind::Answer {
            return Ok(());
        }

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after setting answer".to_string()))?;

        self.events.emit(EngineEvent::LocalDescription {
            kind: SdpKind::Answer,
            sdp: local.sdp,
        });

        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn round_trip_time_ms(&self) -> Option<f64> {
        let report = self.peer_connection.get_stats().await;
        report.reports.values().find_map(|r| match r {
            StatsReportType::CandidatePair(pair) if pair.nominated => {
                Some(pair.current_round_trip_time * 1000.0)
            }
            _ => None,
        })
    }

    fn selected_candidate_pair(&self) -> Option<String> {
        self.candidate_pair.lock().clone()
    }

    fn video_counters(&self) -> VideoCounters {
        VideoCounters {
            packets: self.video_packets.load(Ordering::Relaxed),
            bytes: self.video_bytes.load(Ordering::Relaxed),
        }
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close: {}", e)))
    }
}

/// Data channel accepted from the remote side
pub struct RtcDataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannelHandle for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, data: Bytes) -> Result<usize> {
        self.channel
            .send(&data)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send on '{}': {}", self.label, e)))
    }

    async fn send_text(&self, text: String) -> Result<usize> {
        self.channel
            .send_text(text)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send text on '{}': {}", self.label, e)))
    }
}
