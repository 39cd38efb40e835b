//! Connection worker
//!
//! One worker per link. It owns the peer connection context, drives the
//! [`WorkerState`] machine from signaling and engine events, schedules
//! reconnection and publishes status, statistics and received bytes.
//!
//! The worker is a single task: commands, signaling events, engine events and
//! timers are multiplexed in one `select!` loop and handled one at a time.

use super::context::{ChannelRole, PeerConnectionContext};
use super::candidates::Admission;
use super::state::{AtomicWorkerState, WorkerState};
use super::stats::{LinkStats, TransferRateCalculator};
use super::telemetry::{SystemInfo, Telemetry, VersionInfo, VideoMetrics};
use crate::config::{ConnectionIdentity, LinkConfig, LinkOptions};
use crate::peer::{
    ChannelPayload, EngineEvent, EngineEventSink, GenerationEvent, IceCandidate, PeerEngine,
    PeerState, ReconnectDecision, ReconnectionPolicy, ReconnectionTracker, SdpKind,
};
use crate::signaling::{
    error_codes, SignalingEvent, SignalingMessage, SignalingService, SubscriptionId,
};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Requests accepted by the worker
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Register and wait for the remote offer
    Start,
    /// Drop the current attempt and start over with a fresh budget
    Reconnect,
    /// Unregister and release the link after the grace period
    Disconnect,
    /// Send bytes on the control channel
    WriteBytes(Bytes),
    /// Send a text message on the secondary channel
    SendCustom(String),
    /// Tear down and stop the worker
    Shutdown,
}

/// Events published to the link owner
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Control channel open, link usable
    Connected,
    /// Link no longer usable
    Disconnected,
    /// Payload received on the control channel
    BytesReceived(Bytes),
    /// Bytes written to the control channel
    BytesSent(usize),
    /// Remote video track attached to the current peer connection
    VideoTrackReceived(String),
    /// Human-readable status changed
    StatusChanged(String),
    /// Round-trip time in milliseconds
    RttUpdated(u32),
    /// Statistics snapshot changed
    StatsUpdated(LinkStats),
    /// Reconnection scheduled
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Data channel reported an error
    ChannelError { label: String, error: String },
    SystemInfo(SystemInfo),
    VideoMetrics(VideoMetrics),
    VersionInfo(VersionInfo),
    /// Terminal failure; the worker is idle until started again
    Error(String),
}

/// State visible outside the worker task
#[derive(Debug, Default)]
pub struct WorkerShared {
    state: AtomicWorkerState,
    control_open: AtomicBool,
}

impl WorkerShared {
    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    /// Control channel reports open
    pub fn control_open(&self) -> bool {
        self.control_open.load(Ordering::Acquire)
    }
}

/// Owner side of a worker
pub struct WorkerHandle {
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    shared: Arc<WorkerShared>,
    subscription: SubscriptionId,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    status: watch::Receiver<String>,
    stats: watch::Receiver<LinkStats>,
}

impl WorkerHandle {
    /// Post a command to the worker
    pub fn send(&self, cmd: WorkerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|e| Error::WorkerUnavailable(format!("worker stopped, dropped {:?}", e.0)))
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Signaling subscription held by the worker
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Take the event stream; only the first call gets it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.take()
    }

    pub fn status(&self) -> watch::Receiver<String> {
        self.status.clone()
    }

    pub fn stats(&self) -> watch::Receiver<LinkStats> {
        self.stats.clone()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The worker task
pub struct ConnectionWorker {
    identity: ConnectionIdentity,
    options: LinkOptions,
    signaling: Arc<dyn SignalingService>,
    engine: Arc<dyn PeerEngine>,
    shared: Arc<WorkerShared>,

    subscription: SubscriptionId,
    signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
    signaling_open: bool,
    engine_tx: mpsc::UnboundedSender<GenerationEvent>,
    engine_rx: mpsc::UnboundedReceiver<GenerationEvent>,
    cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,

    events: mpsc::UnboundedSender<LinkEvent>,
    status_tx: watch::Sender<String>,
    stats_tx: watch::Sender<LinkStats>,

    context: Option<PeerConnectionContext>,
    generation: u64,
    tracker: ReconnectionTracker,

    register_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    cleanup_at: Option<Instant>,
    next_rtt: Option<Instant>,
    next_stats: Option<Instant>,

    sent: TransferRateCalculator,
    received: TransferRateCalculator,
    video: TransferRateCalculator,
    rtt_ms: u32,
    last_stats: LinkStats,
}

impl ConnectionWorker {
    /// Build a worker and its handle
    ///
    /// Subscribes to `signaling` immediately so that no event is missed
    /// between construction and [`ConnectionWorker::run`].
    pub fn new(
        config: &LinkConfig,
        signaling: Arc<dyn SignalingService>,
        engine: Arc<dyn PeerEngine>,
    ) -> (Self, WorkerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel("Idle".to_string());
        let (stats_tx, stats_rx) = watch::channel(LinkStats::default());
        let (subscription, signaling_rx) = signaling.subscribe();
        let shared = Arc::new(WorkerShared::default());

        let worker = Self {
            identity: config.identity.clone(),
            options: config.options.clone(),
            signaling,
            engine,
            shared: shared.clone(),
            subscription,
            signaling_rx,
            signaling_open: true,
            engine_tx,
            engine_rx,
            cmd_rx,
            events: events_tx,
            status_tx,
            stats_tx,
            context: None,
            generation: 0,
            tracker: ReconnectionTracker::new(ReconnectionPolicy::from(&config.reconnect)),
            register_at: None,
            reconnect_at: None,
            cleanup_at: None,
            next_rtt: None,
            next_stats: None,
            sent: TransferRateCalculator::new(),
            received: TransferRateCalculator::new(),
            video: TransferRateCalculator::new(),
            rtt_ms: 0,
            last_stats: LinkStats::default(),
        };

        let handle = WorkerHandle {
            cmd_tx,
            shared,
            subscription,
            events: Some(events_rx),
            status: status_rx,
            stats: stats_rx,
        };

        (worker, handle)
    }

    /// Process commands, events and timers until shutdown
    pub async fn run(mut self) {
        info!(
            gcs_id = %self.identity.gcs_id,
            target = %self.identity.target_drone_id,
            "Connection worker started"
        );

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(WorkerCommand::Shutdown) | None => {
                        self.shutdown().await;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = self.signaling_rx.recv(), if self.signaling_open => match event {
                    Some(event) => self.handle_signaling(event).await,
                    None => {
                        warn!("Signaling service is gone");
                        self.signaling_open = false;
                    }
                },
                Some((generation, event)) = self.engine_rx.recv() => {
                    self.handle_engine(generation, event).await;
                }
                _ = sleep_until_opt(self.register_at) => {
                    self.register_at = None;
                    self.register();
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!("Reconnection timer fired");
                    self.register();
                }
                _ = sleep_until_opt(self.cleanup_at) => self.finish_cleanup().await,
                _ = sleep_until_opt(self.next_rtt) => self.refresh_rtt().await,
                _ = sleep_until_opt(self.next_stats) => self.refresh_stats(),
            }
        }

        info!(gcs_id = %self.identity.gcs_id, "Connection worker stopped");
    }

    fn state(&self) -> WorkerState {
        self.shared.state.load()
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.shared.state.transition(from, to).is_ok()
    }

    async fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Start => self.start().await,
            WorkerCommand::Reconnect => self.manual_reconnect().await,
            WorkerCommand::Disconnect => self.disconnect(),
            WorkerCommand::WriteBytes(data) => self.write_bytes(data).await,
            WorkerCommand::SendCustom(text) => self.send_custom(text).await,
            WorkerCommand::Shutdown => {}
        }
    }

    // ===== Lifecycle =====

    #[instrument(skip(self), fields(gcs_id = %self.identity.gcs_id))]
    async fn start(&mut self) {
        if self.state() == WorkerState::Disconnecting {
            // Connecting again during the grace period
            self.finish_cleanup().await;
        }

        let state = self.state();
        if !matches!(state, WorkerState::Idle | WorkerState::Reconnecting) {
            debug!("Start ignored, worker is {}", state);
            return;
        }
        if !self.transition(state, WorkerState::Starting) {
            return;
        }

        self.reconnect_at = None;
        self.cleanup_at = None;
        self.discard_context().await;
        self.tracker.reset();

        // Registration runs on the next loop turn
        self.register_at = Some(Instant::now());
        self.set_status("Starting");
    }

    /// Send the registration for this identity
    fn register(&mut self) {
        let state = self.state();
        match state {
            WorkerState::Starting | WorkerState::Reconnecting => {
                if !self.transition(state, WorkerState::Connecting) {
                    return;
                }
            }
            // Re-registration after a pairing conflict
            WorkerState::Connecting => {}
            _ => {
                debug!("Registration skipped, worker is {}", state);
                return;
            }
        }

        info!(
            gcs_id = %self.identity.gcs_id,
            "Registering for pairing with {}", self.identity.target_drone_id
        );
        self.signaling
            .register_peer(&self.identity.gcs_id, &self.identity.target_drone_id);
        self.set_status(&format!(
            "Registering with {}",
            self.identity.target_drone_id
        ));
    }

    fn disconnect(&mut self) {
        let state = self.state();
        if matches!(
            state,
            WorkerState::Idle
                | WorkerState::Disconnecting
                | WorkerState::CleaningUp
                | WorkerState::Shutdown
        ) {
            debug!("Disconnect ignored, worker is {}", state);
            return;
        }
        if !self.transition(state, WorkerState::Disconnecting) {
            return;
        }

        info!(gcs_id = %self.identity.gcs_id, "Disconnecting link");
        self.register_at = None;
        self.reconnect_at = None;
        self.stop_link_timers();
        self.shared.control_open.store(false, Ordering::Release);
        self.signaling.unregister_peer(&self.identity.gcs_id);

        // Give the leave message time to reach the server
        self.cleanup_at = Some(Instant::now() + self.options.cleanup_grace());
        self.set_status("Disconnecting");
    }

    async fn finish_cleanup(&mut self) {
        self.cleanup_at = None;
        self.discard_context().await;
        if self.transition(WorkerState::Disconnecting, WorkerState::Idle) {
            self.set_status("Disconnected");
            self.emit(LinkEvent::Disconnected);
        }
    }

    async fn manual_reconnect(&mut self) {
        let state = self.state();
        info!(gcs_id = %self.identity.gcs_id, "Manual reconnect requested in {}", state);

        match state {
            WorkerState::Disconnecting => self.finish_cleanup().await,
            WorkerState::Starting
            | WorkerState::Connecting
            | WorkerState::WaitingForOffer
            | WorkerState::EstablishingPeer
            | WorkerState::Connected => {
                self.signaling.unregister_peer(&self.identity.gcs_id);
                self.register_at = None;
                self.discard_context().await;
                if self.transition(state, WorkerState::Reconnecting) && state == WorkerState::Connected
                {
                    self.emit(LinkEvent::Disconnected);
                }
            }
            _ => {}
        }

        self.start().await;
    }

    async fn shutdown(&mut self) {
        let state = self.state();
        info!(gcs_id = %self.identity.gcs_id, "Shutting down worker from {}", state);

        if !matches!(
            state,
            WorkerState::Idle | WorkerState::Disconnecting | WorkerState::Shutdown
        ) {
            self.signaling.unregister_peer(&self.identity.gcs_id);
        }

        self.register_at = None;
        self.reconnect_at = None;
        self.cleanup_at = None;
        self.discard_context().await;

        if state != WorkerState::Shutdown {
            let _ = self.shared.state.transition(state, WorkerState::Shutdown);
        }
        if state == WorkerState::Connected {
            self.emit(LinkEvent::Disconnected);
        }
        self.set_status("Shut down");
        self.signaling.unsubscribe(self.subscription);
    }

    // ===== Reconnection =====

    /// Peer loss: unregister, drop the context, back off and try again
    async fn enter_reconnect(&mut self, reason: &str) {
        let state = self.state();
        if state.is_shutting_down() || matches!(state, WorkerState::Idle | WorkerState::Reconnecting)
        {
            debug!("Reconnection not entered from {}: {}", state, reason);
            return;
        }

        warn!(gcs_id = %self.identity.gcs_id, "Link lost in {}: {}", state, reason);

        self.signaling.unregister_peer(&self.identity.gcs_id);
        self.register_at = None;
        self.discard_context().await;

        if !self.transition(state, WorkerState::Reconnecting) {
            return;
        }
        if state == WorkerState::Connected {
            self.emit(LinkEvent::Disconnected);
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.tracker.next_attempt() {
            ReconnectDecision::Retry { attempt, delay } => {
                let max_attempts = self.tracker.policy().max_attempts;
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_status(&format!(
                    "Reconnecting in {:.1}s (attempt {}/{})",
                    delay.as_secs_f64(),
                    attempt,
                    max_attempts
                ));
                self.emit(LinkEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    delay,
                });
            }
            ReconnectDecision::GiveUp { attempts } => {
                self.reconnect_at = None;
                let message = format!("Connection failed after {} reconnection attempts", attempts);
                error!(gcs_id = %self.identity.gcs_id, "{}", message);

                if self.transition(WorkerState::Reconnecting, WorkerState::CleaningUp) {
                    self.transition(WorkerState::CleaningUp, WorkerState::Idle);
                }
                self.set_status(&message);
                self.emit(LinkEvent::Error(message));
            }
        }
    }

    /// Unrecoverable pairing problem: back to idle with an error
    async fn fail_pairing(&mut self, message: String) {
        let state = self.state();
        error!(gcs_id = %self.identity.gcs_id, "{}", message);

        self.register_at = None;
        self.reconnect_at = None;
        self.signaling.unregister_peer(&self.identity.gcs_id);
        self.discard_context().await;

        if state != WorkerState::Idle
            && self.transition(state, WorkerState::CleaningUp)
            && self.transition(WorkerState::CleaningUp, WorkerState::Idle)
            && state == WorkerState::Connected
        {
            self.emit(LinkEvent::Disconnected);
        }

        self.set_status(&message);
        self.emit(LinkEvent::Error(message));
    }

    // ===== Peer connection context =====

    async fn create_context(&mut self) -> Result<()> {
        self.generation += 1;
        let sink = EngineEventSink::new(self.generation, self.engine_tx.clone());
        let peer = self.engine.create_peer(&self.identity, sink).await?;

        info!(
            generation = self.generation,
            connection_id = peer.connection_id(),
            "Peer connection created"
        );
        self.context = Some(PeerConnectionContext::new(self.generation, peer));
        Ok(())
    }

    /// Close and forget the current context
    async fn discard_context(&mut self) {
        self.stop_link_timers();
        self.shared.control_open.store(false, Ordering::Release);

        if let Some(context) = self.context.take() {
            debug!(generation = context.generation(), "Discarding peer connection context");
            context.close().await;
        }

        self.sent.reset();
        self.received.reset();
        self.video.reset();
        self.last_stats = LinkStats::default();
        if self.rtt_ms != 0 {
            self.rtt_ms = 0;
            self.emit(LinkEvent::RttUpdated(0));
        }
    }

    // ===== Signaling =====

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        let own_id = self.identity.gcs_id.clone();

        match event {
            SignalingEvent::RegistrationSuccessful { id, paired_with } if id == own_id => {
                self.on_registered(paired_with).await;
            }
            SignalingEvent::RegistrationFailed { id, reason } if id == own_id => {
                let error = Error::RegistrationFailed(reason);
                warn!(gcs_id = %own_id, "{}", error);
                self.enter_reconnect(&error.to_string()).await;
            }
            SignalingEvent::PeerUnregistered { id } if id == own_id => {
                debug!(gcs_id = %own_id, "Unregistered from signaling server");
            }
            SignalingEvent::PeerUnregisterFailed {
                id,
                reason,
                unreachable,
            } if id == own_id => {
                if unreachable {
                    warn!(gcs_id = %own_id, "Unregister not delivered, server unreachable: {}", reason);
                } else {
                    warn!(gcs_id = %own_id, "Unregister rejected by server: {}", reason);
                }
            }
            SignalingEvent::Message(message) => self.handle_message(message).await,
            SignalingEvent::Connected => {
                debug!("Signaling connected");
                if self.state() == WorkerState::Idle {
                    self.set_status("Signaling connected");
                }
            }
            SignalingEvent::Disconnected => {
                debug!("Signaling disconnected");
            }
            SignalingEvent::ConnectedPeersChanged(peers) => {
                let online = peers.contains(&self.identity.target_drone_id);
                debug!(
                    "Target {} is {}",
                    self.identity.target_drone_id,
                    if online { "online" } else { "offline" }
                );
            }
            SignalingEvent::ConnectionError(_)
            | SignalingEvent::StatusChanged { .. }
            | SignalingEvent::LatencyUpdated(_) => {}
            // Outcomes for other local ids
            _ => {}
        }
    }

    async fn on_registered(&mut self, paired_with: Option<String>) {
        let state = self.state();
        if state != WorkerState::Connecting {
            debug!("Registration confirmation ignored in {}", state);
            return;
        }

        self.discard_context().await;
        if let Err(e) = self.create_context().await {
            self.enter_reconnect(&format!("failed to create peer connection: {}", e))
                .await;
            return;
        }

        if !self.transition(WorkerState::Connecting, WorkerState::WaitingForOffer) {
            return;
        }

        let peer = paired_with.unwrap_or_else(|| self.identity.target_drone_id.clone());
        info!(gcs_id = %self.identity.gcs_id, "Paired with {}, waiting for offer", peer);
        self.set_status(&format!("Paired with {}, waiting for offer", peer));
    }

    async fn handle_message(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Offer { id, to, sdp } => {
                if !self.addressed_to_us(&id, &to) {
                    debug!("Ignoring offer from {} to {}", id, to);
                    return;
                }
                if sdp.is_empty() {
                    warn!("Dropping offer with empty SDP");
                    return;
                }
                self.handle_offer(sdp).await;
            }
            SignalingMessage::Answer { id, to, sdp } => {
                if !self.addressed_to_us(&id, &to) || sdp.is_empty() {
                    return;
                }
                self.handle_answer(sdp).await;
            }
            SignalingMessage::Candidate {
                id,
                to,
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                if !self.addressed_to_us(&id, &to) {
                    return;
                }
                let (Some(candidate), Some(sdp_mid)) = (candidate, sdp_mid) else {
                    warn!("Dropping candidate without candidate or sdpMid");
                    return;
                };
                self.handle_remote_candidate(IceCandidate {
                    candidate,
                    sdp_mid: Some(sdp_mid),
                    sdp_mline_index,
                })
                .await;
            }
            SignalingMessage::PeerDisconnected { id } => {
                if id == self.identity.target_drone_id {
                    self.enter_reconnect("peer disconnected from signaling server")
                        .await;
                }
            }
            SignalingMessage::Error {
                code,
                message,
                paired_with,
            } => self.handle_server_error(code, message, paired_with).await,
            other => debug!("Ignoring signaling message {}", other.kind()),
        }
    }

    fn addressed_to_us(&self, from: &str, to: &str) -> bool {
        (from.is_empty() || from == self.identity.target_drone_id)
            && (to.is_empty() || to == self.identity.gcs_id)
    }

    async fn handle_server_error(
        &mut self,
        code: String,
        message: String,
        paired_with: Option<String>,
    ) {
        if code != error_codes::DRONE_ALREADY_PAIRED {
            let error = Error::SignalingError(format!("{}: {}", code, message));
            if self.state().is_negotiating() || self.state() == WorkerState::Reconnecting {
                self.fail_pairing(error.to_string()).await;
            } else {
                warn!(gcs_id = %self.identity.gcs_id, "{}", error);
                self.set_status(&error.to_string());
                self.emit(LinkEvent::Error(error.to_string()));
            }
            return;
        }

        match paired_with {
            Some(owner) if owner == self.identity.gcs_id => {
                self.reregister_after_stale_pairing().await;
            }
            owner => {
                let owner = owner.unwrap_or_else(|| "another client".to_string());
                self.fail_pairing(Error::AlreadyPaired(owner).to_string())
                    .await;
            }
        }
    }

    /// The server still pairs the target with this id: leave, then register again
    async fn reregister_after_stale_pairing(&mut self) {
        let state = self.state();
        if state.is_shutting_down() || state == WorkerState::Idle {
            debug!("Stale pairing ignored in {}", state);
            return;
        }

        info!(
            gcs_id = %self.identity.gcs_id,
            "Target still paired with this identity, re-registering"
        );
        self.signaling.unregister_peer(&self.identity.gcs_id);
        self.reconnect_at = None;

        // Registration is only sent from Starting, Connecting or Reconnecting
        if matches!(
            state,
            WorkerState::WaitingForOffer | WorkerState::EstablishingPeer | WorkerState::Connected
        ) {
            self.discard_context().await;
            if !self.transition(state, WorkerState::Reconnecting) {
                return;
            }
            if state == WorkerState::Connected {
                self.emit(LinkEvent::Disconnected);
            }
        }

        self.register_at = Some(Instant::now() + self.options.reregister_delay());
        self.set_status("Re-registering with signaling server");
    }

    #[instrument(skip(self, sdp), fields(gcs_id = %self.identity.gcs_id, sdp_len = sdp.len()))]
    async fn handle_offer(&mut self, sdp: String) {
        let state = self.state();
        if state.is_shutting_down() {
            debug!("Ignoring offer while shutting down");
            return;
        }

        match state {
            WorkerState::Connected => {
                info!("Ignoring duplicate offer, link already connected");
                return;
            }
            WorkerState::Connecting => {
                // Offer overtook the registration confirmation
                self.on_registered(None).await;
                if self.state() != WorkerState::WaitingForOffer {
                    return;
                }
            }
            WorkerState::WaitingForOffer | WorkerState::EstablishingPeer => {}
            _ => {
                debug!("Ignoring offer in {}", state);
                return;
            }
        }

        if let Some(context) = &self.context {
            let peer_state = context.peer().state();
            if peer_state.is_active() {
                info!("Ignoring duplicate offer, peer connection is {:?}", peer_state);
                return;
            }
            if peer_state.is_degraded() || context.remote_description_set() {
                info!("Rebuilding peer connection ({:?}) for new offer", peer_state);
                self.discard_context().await;
            }
        }

        if self.context.is_none() {
            if let Err(e) = self.create_context().await {
                self.enter_reconnect(&format!("failed to create peer connection: {}", e))
                    .await;
                return;
            }
        }

        if self.state() == WorkerState::WaitingForOffer
            && !self.transition(WorkerState::WaitingForOffer, WorkerState::EstablishingPeer)
        {
            return;
        }
        self.set_status("Establishing peer connection");

        if let Err(e) = self.apply_remote_description(SdpKind::Offer, sdp).await {
            self.enter_reconnect(&format!("offer could not be applied: {}", e))
                .await;
        }
    }

    async fn handle_answer(&mut self, sdp: String) {
        warn!("Unexpected answer received, this side always answers");
        if self.context.is_none() || !self.state().is_negotiating() {
            return;
        }
        if let Err(e) = self.apply_remote_description(SdpKind::Answer, sdp).await {
            warn!("Failed to apply unexpected answer: {}", e);
        }
    }

    /// Apply a remote description, then flush queued candidates in order
    async fn apply_remote_description(&mut self, kind: SdpKind, sdp: String) -> Result<()> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::InternalError("no peer connection context".to_string()))?;

        context.peer().set_remote_description(kind, sdp).await?;

        let pending = context.candidates().open();
        if !pending.is_empty() {
            debug!("Applying {} queued ICE candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = context.peer().add_ice_candidate(candidate).await {
                warn!("Failed to apply queued ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    async fn handle_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(context) = &self.context else {
            debug!("Dropping ICE candidate, no peer connection");
            return;
        };

        match context.candidates().admit(candidate) {
            Admission::Apply(candidate) => {
                if let Err(e) = context.peer().add_ice_candidate(candidate).await {
                    warn!("Failed to add ICE candidate: {}", e);
                }
            }
            Admission::Queued { pending } => {
                debug!("Queued ICE candidate until remote description is set ({} pending)", pending);
            }
        }
    }

    // ===== Engine =====

    async fn handle_engine(&mut self, generation: u64, event: EngineEvent) {
        let current = self.context.as_ref().map(|c| c.generation());
        if current != Some(generation) {
            debug!(generation, ?current, "Dropping stale engine event {:?}", event);
            return;
        }

        match event {
            EngineEvent::StateChanged(peer_state) => self.on_peer_state(peer_state).await,
            EngineEvent::LocalDescription { kind, sdp } => {
                if kind == SdpKind::Answer {
                    debug!("Sending answer ({} bytes)", sdp.len());
                    self.signaling.send_message(SignalingMessage::answer(
                        &self.identity.gcs_id,
                        &self.identity.target_drone_id,
                        sdp,
                    ));
                }
            }
            EngineEvent::LocalCandidate(candidate) => {
                self.signaling.send_message(SignalingMessage::candidate(
                    &self.identity.gcs_id,
                    &self.identity.target_drone_id,
                    &candidate,
                ));
            }
            EngineEvent::DataChannel(channel) => {
                let already_open = channel.is_open();
                let role = match self.context.as_mut() {
                    Some(context) => context.attach_channel(channel),
                    None => return,
                };
                info!("Data channel attached as {:?}", role);
                if role == ChannelRole::Control && already_open {
                    self.on_control_open();
                }
            }
            EngineEvent::ChannelOpen { label } => match ChannelRole::from_label(&label) {
                ChannelRole::Control => self.on_control_open(),
                ChannelRole::Custom => info!("Secondary data channel open"),
                ChannelRole::Unknown => {}
            },
            EngineEvent::ChannelClosed { label } => {
                if ChannelRole::from_label(&label) == ChannelRole::Control {
                    info!("Control data channel closed");
                    self.shared.control_open.store(false, Ordering::Release);
                    self.next_rtt = None;
                    self.rtt_ms = 0;
                    self.emit(LinkEvent::RttUpdated(0));
                }
            }
            EngineEvent::ChannelError { label, error } => {
                warn!("Data channel '{}' error: {}", label, error);
                self.emit(LinkEvent::ChannelError { label, error });
            }
            EngineEvent::ChannelMessage { label, payload } => {
                self.on_channel_message(&label, payload);
            }
            EngineEvent::Track { kind, id } => {
                if kind == "video" {
                    if let Some(context) = self.context.as_mut() {
                        if context.attach_track(id.clone()) {
                            info!("Inbound video track {} attached", id);
                            self.emit(LinkEvent::VideoTrackReceived(id));
                        }
                    }
                }
            }
        }
    }

    async fn on_peer_state(&mut self, peer_state: PeerState) {
        info!("Peer connection state: {:?}", peer_state);

        if peer_state == PeerState::Connected {
            if self.state() == WorkerState::EstablishingPeer {
                self.set_status("Peer connected, waiting for data channel");
            }
            return;
        }

        if peer_state.is_degraded()
            && matches!(
                self.state(),
                WorkerState::WaitingForOffer | WorkerState::EstablishingPeer | WorkerState::Connected
            )
        {
            self.enter_reconnect(&format!("peer connection {:?}", peer_state))
                .await;
        }
    }

    fn on_control_open(&mut self) {
        let state = self.state();
        if state != WorkerState::EstablishingPeer {
            debug!("Control channel open ignored in {}", state);
            return;
        }
        if !self.transition(WorkerState::EstablishingPeer, WorkerState::Connected) {
            return;
        }

        self.tracker.on_connected();
        self.shared.control_open.store(true, Ordering::Release);

        let now = Instant::now();
        self.sent.reset();
        self.received.reset();
        // Video bytes may have arrived before the control channel opened
        match self.context.as_ref().map(|c| c.peer().video_counters()) {
            Some(counters) => self.video.reset_to(counters.bytes, counters.packets),
            None => self.video.reset(),
        }
        self.next_rtt = Some(now + self.options.rtt_interval());
        self.next_stats = Some(now + self.options.stats_interval());

        info!(
            gcs_id = %self.identity.gcs_id,
            "Link connected to {}", self.identity.target_drone_id
        );
        self.set_status(&format!("Connected to {}", self.identity.target_drone_id));
        self.emit(LinkEvent::Connected);
    }

    fn on_channel_message(&mut self, label: &str, payload: ChannelPayload) {
        match ChannelRole::from_label(label) {
            ChannelRole::Control => {
                let data = match payload {
                    ChannelPayload::Binary(data) => data,
                    ChannelPayload::Text(text) => Bytes::from(text.into_bytes()),
                };
                self.received.add(data.len() as u64, 1);
                self.emit(LinkEvent::BytesReceived(data));
            }
            ChannelRole::Custom => {
                let text = match payload {
                    ChannelPayload::Text(text) => text,
                    ChannelPayload::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Dropping non-UTF-8 message on secondary channel");
                            return;
                        }
                    },
                };
                match Telemetry::parse(&text) {
                    Ok(Telemetry::SystemInfo(info)) => {
                        debug!("System info: {}", info);
                        self.emit(LinkEvent::SystemInfo(info));
                    }
                    Ok(Telemetry::VideoMetrics(metrics)) => {
                        debug!("Video metrics: {}", metrics);
                        self.emit(LinkEvent::VideoMetrics(metrics));
                    }
                    Ok(Telemetry::VersionCheck(version)) => {
                        if version.update_available {
                            info!(
                                "Remote module update available: {} -> {}",
                                version.current_version, version.latest_version
                            );
                        }
                        self.emit(LinkEvent::VersionInfo(version));
                    }
                    Err(e) => warn!("Dropping secondary channel message: {}", e),
                }
            }
            ChannelRole::Unknown => debug!("Ignoring message on channel '{}'", label),
        }
    }

    // ===== Writes =====

    async fn write_bytes(&mut self, data: Bytes) {
        let state = self.state();
        if !state.is_operational() {
            warn!("Dropping {} bytes, worker is {}", data.len(), state);
            return;
        }

        let Some(channel) = self
            .context
            .as_ref()
            .and_then(|c| c.control())
            .filter(|c| c.is_open())
            .cloned()
        else {
            warn!("Dropping {} bytes, control channel not open", data.len());
            return;
        };

        let len = data.len();
        match channel.send(data).await {
            Ok(written) => {
                self.sent.add(written as u64, 1);
                self.emit(LinkEvent::BytesSent(written));
            }
            Err(e) => warn!("Failed to write {} bytes: {}", len, e),
        }
    }

    async fn send_custom(&mut self, text: String) {
        let state = self.state();
        if state.is_shutting_down() {
            warn!("Cannot send custom message, worker is {}", state);
            return;
        }

        let Some(channel) = self
            .context
            .as_ref()
            .and_then(|c| c.custom())
            .filter(|c| c.is_open())
            .cloned()
        else {
            warn!("Cannot send custom message, secondary channel not open");
            return;
        };

        if let Err(e) = channel.send_text(text).await {
            warn!("Failed to send custom message: {}", e);
        }
    }

    // ===== Statistics =====

    fn stop_link_timers(&mut self) {
        self.next_rtt = None;
        self.next_stats = None;
    }

    async fn refresh_rtt(&mut self) {
        self.next_rtt = Some(Instant::now() + self.options.rtt_interval());
        let Some(context) = &self.context else {
            return;
        };

        if let Some(rtt) = context.peer().round_trip_time_ms().await {
            let rtt = rtt.max(0.0).round() as u32;
            if rtt != self.rtt_ms {
                self.rtt_ms = rtt;
                self.emit(LinkEvent::RttUpdated(rtt));
            }
        }
    }

    fn refresh_stats(&mut self) {
        self.next_stats = Some(Instant::now() + self.options.stats_interval());
        let Some(context) = &self.context else {
            return;
        };

        let counters = context.peer().video_counters();
        let candidate_pair = context.peer().selected_candidate_pair();

        self.video.set_totals(counters.bytes, counters.packets);
        let now = Instant::now();
        self.sent.update_rate_at(now);
        self.received.update_rate_at(now);
        self.video.update_rate_at(now);

        let stats = LinkStats {
            rtt_ms: self.rtt_ms,
            candidate_pair,
            sent_kbps: self.sent.rate_kbps(),
            recv_kbps: self.received.rate_kbps(),
            video_kbps: self.video.rate_kbps(),
            video_packets: counters.packets,
            video_bytes: counters.bytes,
        };

        if stats != self.last_stats {
            debug!("{}", stats);
            self.stats_tx.send_replace(stats.clone());
            self.emit(LinkEvent::StatsUpdated(stats.clone()));
            self.last_stats = stats;
        }
    }

    // ===== Output =====

    fn set_status(&self, text: &str) {
        let changed = self.status_tx.send_if_modified(|current| {
            if current == text {
                false
            } else {
                *current = text.to_string();
                true
            }
        });
        if changed {
            self.emit(LinkEvent::StatusChanged(text.to_string()));
        }
    }

    fn emit(&self, event: LinkEvent) {
        // The owner may have dropped its receiver
        let _ = self.events.send(event);
    }
}
