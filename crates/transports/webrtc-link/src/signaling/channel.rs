//! Shared signaling channel
//!
//! One task owns the signaling socket, the remembered registrations, the
//! keep-alive and the peer-list poll. Handles are cheap clones that post
//! commands to it. Everything the task observes is broadcast to subscribers
//! as [`SignalingEvent`] values.

use super::backoff::SignalingBackoff;
use super::protocol::{current_timestamp_ms, PeerStatus, SignalingMessage};
use super::registry::PeerRegistry;
use super::transport::{InboundFrame, TungsteniteConnector, WsConnection, WsConnector};
use crate::config::{normalize_signaling_url, SignalingOptions};
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Subscriber handle returned by [`SignalingService::subscribe`]
pub type SubscriptionId = u64;

/// Signaling socket status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Events broadcast to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Socket connected
    Connected,
    /// Socket lost or closed
    Disconnected,
    /// Connect attempt or socket failure
    ConnectionError(String),
    /// Status or status text changed
    StatusChanged {
        status: ConnectionStatus,
        text: String,
    },
    /// Server accepted the registration of `id`
    RegistrationSuccessful {
        id: String,
        paired_with: Option<String>,
    },
    /// Server rejected the registration of `id`
    RegistrationFailed { id: String, reason: String },
    /// Server accepted the unregistration of `id`
    PeerUnregistered { id: String },
    /// Unregistration of `id` was rejected or could not be sent
    PeerUnregisterFailed {
        id: String,
        reason: String,
        /// The request never reached the server
        unreachable: bool,
    },
    /// The set of online peers changed
    ConnectedPeersChanged(Vec<String>),
    /// Keep-alive round trip in milliseconds
    LatencyUpdated(u64),
    /// Peer-to-peer message (offer, answer, candidate, peerDisconnected, error)
    Message(SignalingMessage),
}

/// What a connection worker needs from signaling
///
/// Every call is fire-and-forget; outcomes arrive as [`SignalingEvent`]s.
pub trait SignalingService: Send + Sync {
    /// Add a subscriber
    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SignalingEvent>);

    /// Remove exactly one subscriber
    fn unsubscribe(&self, id: SubscriptionId);

    /// Transmit a message, dropping it when not connected
    fn send_message(&self, message: SignalingMessage);

    /// Register `local_id` for pairing with `target_id`
    fn register_peer(&self, local_id: &str, target_id: &str);

    /// Leave the server
    fn unregister_peer(&self, local_id: &str);

    fn is_connected(&self) -> bool;
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    Send(SignalingMessage),
    Register { local_id: String, target_id: String },
    Unregister { local_id: String },
    Shutdown,
}

struct Shared {
    status: RwLock<(ConnectionStatus, String)>,
    peers: RwLock<PeerRegistry>,
    latency_ms: RwLock<Option<u64>>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<SignalingEvent>>>,
    next_subscription: AtomicU64,
}

impl Shared {
    fn broadcast(&self, event: SignalingEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!(subscription = id, "Dropping closed signaling subscriber");
            }
            alive
        });
    }
}

/// Handle to the shared signaling channel
#[derive(Clone)]
pub struct SignalingChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl SignalingChannel {
    /// Start the channel task with the tokio-tungstenite connector
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// ```
    /// use gcs_webrtc_link::{ConnectionStatus, SignalingChannel, SignalingOptions};
    ///
    /// # tokio_test::block_on(async {
    /// let channel = SignalingChannel::new(SignalingOptions::default());
    /// assert_eq!(channel.status(), ConnectionStatus::Disconnected);
    /// channel.shutdown();
    /// # });
    /// ```
    pub fn new(options: SignalingOptions) -> Self {
        Self::with_connector(options, Arc::new(TungsteniteConnector))
    }

    /// Start the channel task with a custom connector
    pub fn with_connector(options: SignalingOptions, connector: Arc<dyn WsConnector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            status: RwLock::new((ConnectionStatus::Disconnected, "Disconnected".to_string())),
            peers: RwLock::new(PeerRegistry::new()),
            latency_ms: RwLock::new(None),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        });

        let task = ChannelTask {
            backoff: SignalingBackoff::new(&options),
            options,
            connector,
            shared: shared.clone(),
            cmd_rx,
            attempt_tx,
            attempt_rx,
            url: None,
            connection: None,
            epoch: 0,
            attempt_in_flight: false,
            user_disconnected: true,
            reconnect_at: None,
            connected_since: None,
            next_ping: None,
            next_poll: None,
            outstanding_ping: None,
            ping_failures: 0,
            registrations: Vec::new(),
            last_registered: None,
        };
        tokio::spawn(task.run());

        Self { cmd_tx, shared }
    }

    /// Open the socket to `server_url`
    pub fn connect(&self, server_url: &str) {
        self.post(Command::Connect(server_url.to_string()));
    }

    /// Close the socket and suppress auto-reconnect until the next `connect`
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Stop the channel task; handles become inert
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.read().0
    }

    /// Human-readable status
    pub fn status_text(&self) -> String {
        self.shared.status.read().1.clone()
    }

    /// Ids of the peers the server reports online
    pub fn connected_peers(&self) -> Vec<String> {
        self.shared.peers.read().ids()
    }

    /// Server-reported details of an online peer
    pub fn peer(&self, id: &str) -> Option<PeerStatus> {
        self.shared.peers.read().get(id).cloned()
    }

    /// Last measured keep-alive round trip
    pub fn latency_ms(&self) -> Option<u64> {
        *self.shared.latency_ms.read()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    fn post(&self, cmd: Command) {
        if let Err(e) = self.cmd_tx.send(cmd) {
            warn!("Signaling channel is shut down, dropping {:?}", e.0);
        }
    }
}

impl SignalingService for SignalingChannel {
    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().insert(id, tx);
        debug!(subscription = id, "Signaling subscriber added");
        (id, rx)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.shared.subscribers.lock().remove(&id).is_some() {
            debug!(subscription = id, "Signaling subscriber removed");
        }
    }

    fn send_message(&self, message: SignalingMessage) {
        self.post(Command::Send(message));
    }

    fn register_peer(&self, local_id: &str, target_id: &str) {
        self.post(Command::Register {
            local_id: local_id.to_string(),
            target_id: target_id.to_string(),
        });
    }

    fn unregister_peer(&self, local_id: &str) {
        self.post(Command::Unregister {
            local_id: local_id.to_string(),
        });
    }

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }
}

type AttemptResult = (u64, Result<WsConnection>);

struct ChannelTask {
    options: SignalingOptions,
    connector: Arc<dyn WsConnector>,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    attempt_tx: mpsc::UnboundedSender<AttemptResult>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptResult>,

    url: Option<String>,
    connection: Option<WsConnection>,
    /// Bumped on every attempt and disconnect; stale attempt results are dropped
    epoch: u64,
    attempt_in_flight: bool,
    user_disconnected: bool,
    backoff: SignalingBackoff,
    reconnect_at: Option<Instant>,
    connected_since: Option<Instant>,

    next_ping: Option<Instant>,
    next_poll: Option<Instant>,
    /// Timestamp and pong deadline of the unanswered ping
    outstanding_ping: Option<(i64, Instant)>,
    ping_failures: u32,

    /// Active registrations (local id, target id), re-sent on every connect
    registrations: Vec<(String, String)>,
    last_registered: Option<String>,
}

async fn recv_frame(connection: &mut Option<WsConnection>) -> Option<InboundFrame> {
    match connection {
        Some(conn) => conn.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ChannelTask {
    async fn run(mut self) {
        debug!("Signaling channel task started");

        loop {
            let pong_deadline = self.outstanding_ping.map(|(_, deadline)| deadline);

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some((epoch, result)) = self.attempt_rx.recv() => {
                    self.on_attempt_result(epoch, result);
                }
                frame = recv_frame(&mut self.connection) => match frame {
                    Some(InboundFrame::Text(text)) => self.on_text(&text),
                    Some(InboundFrame::Closed(reason)) => self.on_socket_lost(reason),
                    None => self.on_socket_lost(None),
                },
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_attempt();
                }
                _ = sleep_until_opt(pong_deadline) => self.on_pong_timeout(),
                _ = sleep_until_opt(self.next_ping) => self.send_ping(),
                _ = sleep_until_opt(self.next_poll) => self.poll_peers(),
            }
        }

        self.epoch += 1;
        self.connection = None;
        self.set_status(ConnectionStatus::Disconnected, "Shut down");
        self.shared.subscribers.lock().clear();
        info!("Signaling channel shut down");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(url) => self.connect(&url),
            Command::Disconnect => self.disconnect(),
            Command::Send(message) => self.send(&message),
            Command::Register {
                local_id,
                target_id,
            } => self.register(local_id, target_id),
            Command::Unregister { local_id } => self.unregister(&local_id),
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, raw_url: &str) {
        if raw_url.trim().is_empty() {
            warn!("Cannot connect: signaling URL is empty");
            self.emit(SignalingEvent::ConnectionError(
                "Signaling URL is empty".to_string(),
            ));
            return;
        }

        let status = self.shared.status.read().0;
        if matches!(
            status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            debug!("Signaling connect ignored, already {}", status);
            return;
        }

        let url = match normalize_signaling_url(raw_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot connect: {}", e);
                self.emit(SignalingEvent::ConnectionError(e.to_string()));
                return;
            }
        };

        self.url = Some(url);
        self.user_disconnected = false;
        self.reconnect_at = None;
        self.backoff.reset();
        self.attempt_in_flight = false;
        self.set_status(ConnectionStatus::Connecting, "Connecting...");
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        if self.user_disconnected || self.attempt_in_flight || self.connection.is_some() {
            return;
        }

        self.epoch += 1;
        self.attempt_in_flight = true;
        let epoch = self.epoch;
        let connector = self.connector.clone();
        let tx = self.attempt_tx.clone();

        debug!(epoch, "Opening signaling socket to {}", url);
        tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = tx.send((epoch, result));
        });
    }

    fn on_attempt_result(&mut self, epoch: u64, result: Result<WsConnection>) {
        if epoch != self.epoch || self.user_disconnected {
            debug!(epoch, "Discarding stale signaling connect result");
            return;
        }
        self.attempt_in_flight = false;

        match result {
            Ok(connection) => {
                let now = Instant::now();
                self.connection = Some(connection);
                self.connected_since = Some(now);
                self.backoff.reset();
                self.outstanding_ping = None;
                self.ping_failures = 0;
                self.next_ping = Some(now + self.ping_interval());
                self.next_poll = Some(now + self.poll_interval());

                let text = match &self.url {
                    Some(url) => format!("Connected to {}", url),
                    None => "Connected".to_string(),
                };
                info!("{}", text);
                self.set_status(ConnectionStatus::Connected, &text);
                self.emit(SignalingEvent::Connected);
                self.resend_registrations();
            }
            Err(e) => {
                warn!("Signaling connect failed: {}", e);
                self.emit(SignalingEvent::ConnectionError(e.to_string()));
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.user_disconnected {
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                let text = format!(
                    "Reconnecting in {:.1}s (attempt {}/{})",
                    delay.as_secs_f64(),
                    self.backoff.attempts(),
                    self.backoff.max_attempts()
                );
                info!("{}", text);
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_status(ConnectionStatus::Reconnecting, &text);
            }
            None => {
                error!(
                    "Giving up on signaling server after {} attempts",
                    self.backoff.attempts()
                );
                self.reconnect_at = None;
                self.set_status(ConnectionStatus::Error, "Max reconnect attempts exceeded");
                self.emit(SignalingEvent::ConnectionError(
                    "max reconnect attempts exceeded".to_string(),
                ));
            }
        }
    }

    fn disconnect(&mut self) {
        info!("Disconnecting from signaling server");
        self.user_disconnected = true;
        self.reconnect_at = None;
        self.attempt_in_flight = false;
        self.epoch += 1;
        self.clear_keepalive();

        let was_connected = self.connection.take().is_some();
        self.clear_peers();
        self.set_status(ConnectionStatus::Disconnected, "Disconnected");
        if was_connected {
            self.emit(SignalingEvent::Disconnected);
        }
    }

    fn on_socket_lost(&mut self, reason: Option<String>) {
        if self.connection.take().is_none() {
            return;
        }

        let lifetime = self.connected_since.take().map(|since| since.elapsed());
        match &reason {
            Some(reason) => warn!("Signaling socket lost: {}", reason),
            None => warn!("Signaling socket lost"),
        }

        self.clear_keepalive();
        self.clear_peers();
        self.set_status(ConnectionStatus::Disconnected, "Connection lost");
        self.emit(SignalingEvent::Disconnected);

        if let Some(lifetime) = lifetime {
            if self.backoff.penalize_short_connection(lifetime) {
                debug!(
                    attempts = self.backoff.attempts(),
                    "Signaling connection lived only {:?}, penalized", lifetime
                );
            }
        }
        self.schedule_reconnect();
    }

    fn send(&mut self, message: &SignalingMessage) {
        let Some(connection) = &self.connection else {
            warn!("Not connected to signaling server, dropping {}", message.kind());
            return;
        };

        match message.to_json() {
            Ok(json) => {
                debug!("Sending signaling message: {}", message.kind());
                if connection.outbound.send(json).is_err() {
                    warn!("Signaling socket writer is gone, dropping {}", message.kind());
                }
            }
            Err(e) => error!("Failed to serialize {}: {}", message.kind(), e),
        }
    }

    fn register(&mut self, local_id: String, target_id: String) {
        self.registrations.retain(|(local, _)| *local != local_id);
        self.registrations
            .push((local_id.clone(), target_id.clone()));

        if self.connection.is_some() {
            self.send_register(&local_id, &target_id);
        } else {
            info!(
                gcs_id = %local_id,
                "Registration with {} queued until signaling connects", target_id
            );
        }
    }

    fn send_register(&mut self, local_id: &str, target_id: &str) {
        info!(gcs_id = %local_id, "Registering for pairing with {}", target_id);
        self.last_registered = Some(local_id.to_string());
        let message = SignalingMessage::register(local_id, target_id, &self.options);
        self.send(&message);
    }

    /// Local id registered for `target`, when exactly one matches
    fn registration_for_target(&self, target: Option<&str>) -> Option<String> {
        let target = target?;
        let mut matches = self
            .registrations
            .iter()
            .filter(|(_, target_id)| target_id == target);
        match (matches.next(), matches.next()) {
            (Some((local_id, _)), None) => Some(local_id.clone()),
            _ => None,
        }
    }

    fn resend_registrations(&mut self) {
        for (local_id, target_id) in self.registrations.clone() {
            self.send_register(&local_id, &target_id);
        }
    }

    fn unregister(&mut self, local_id: &str) {
        self.registrations.retain(|(local, _)| local != local_id);

        if self.connection.is_some() {
            info!(gcs_id = %local_id, "Unregistering");
            self.send(&SignalingMessage::unregister(local_id));
        } else {
            warn!(gcs_id = %local_id, "Cannot unregister, signaling server unreachable");
            self.emit(SignalingEvent::PeerUnregisterFailed {
                id: local_id.to_string(),
                reason: "signaling server unreachable".to_string(),
                unreachable: true,
            });
        }
    }

    fn on_text(&mut self, text: &str) {
        let message = match SignalingMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed signaling message: {}", e);
                return;
            }
        };

        debug!("Received signaling message: {}", message.kind());

        match message {
            SignalingMessage::Ping { timestamp } => {
                self.send(&SignalingMessage::Pong { timestamp });
            }
            SignalingMessage::Pong { timestamp } => self.on_pong(timestamp),
            SignalingMessage::Registered {
                id,
                success,
                paired_with,
                reason,
            } => {
                let id = id
                    .or_else(|| self.registration_for_target(paired_with.as_deref()))
                    .or_else(|| self.last_registered.clone());
                let Some(id) = id else {
                    warn!("Registration response without a pending registration");
                    return;
                };
                if success {
                    info!(gcs_id = %id, paired_with = ?paired_with, "Registered");
                    self.emit(SignalingEvent::RegistrationSuccessful { id, paired_with });
                } else {
                    let reason = reason.unwrap_or_else(|| "unknown reason".to_string());
                    warn!(gcs_id = %id, "Registration failed: {}", reason);
                    self.registrations.retain(|(local, _)| *local != id);
                    self.emit(SignalingEvent::RegistrationFailed { id, reason });
                }
            }
            SignalingMessage::UnregisteredSuccessfully { id } => {
                self.emit(SignalingEvent::PeerUnregistered { id });
            }
            SignalingMessage::UnregisterFailed { id, reason } => {
                self.emit(SignalingEvent::PeerUnregisterFailed {
                    id,
                    reason: reason.unwrap_or_else(|| "unknown reason".to_string()),
                    unreachable: false,
                });
            }
            SignalingMessage::Unregistered { id, success, reason } => {
                if success {
                    self.emit(SignalingEvent::PeerUnregistered { id });
                } else {
                    self.emit(SignalingEvent::PeerUnregisterFailed {
                        id,
                        reason: reason.unwrap_or_else(|| "unknown reason".to_string()),
                        unreachable: false,
                    });
                }
            }
            SignalingMessage::DronesList { drones, .. } => {
                let ids = {
                    let mut peers = self.shared.peers.write();
                    peers.apply_snapshot(drones).then(|| peers.ids())
                };
                if let Some(ids) = ids {
                    debug!("Online peers changed: {:?}", ids);
                    self.emit(SignalingEvent::ConnectedPeersChanged(ids));
                }
            }
            SignalingMessage::ConnectionReplaced => {
                info!("Signaling connection replaced by another session");
            }
            SignalingMessage::Unknown => {
                debug!("Ignoring signaling message of unknown type");
            }
            SignalingMessage::Register { .. }
            | SignalingMessage::Unregister { .. }
            | SignalingMessage::GetDrones => {
                debug!("Ignoring client-side message {} from server", message.kind());
            }
            SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::Candidate { .. }
            | SignalingMessage::PeerDisconnected { .. }
            | SignalingMessage::Error { .. } => {
                self.emit(SignalingEvent::Message(message));
            }
        }
    }

    fn send_ping(&mut self) {
        self.next_ping = Some(Instant::now() + self.ping_interval());
        if self.connection.is_none() || self.outstanding_ping.is_some() {
            return;
        }

        let timestamp = current_timestamp_ms();
        self.outstanding_ping = Some((
            timestamp,
            Instant::now() + Duration::from_millis(self.options.pong_timeout_ms),
        ));
        self.send(&SignalingMessage::Ping { timestamp });
    }

    fn on_pong(&mut self, timestamp: i64) {
        match self.outstanding_ping {
            Some((sent, _)) if sent == timestamp => {
                self.outstanding_ping = None;
                self.ping_failures = 0;
                let latency = (current_timestamp_ms() - timestamp).max(0) as u64;
                *self.shared.latency_ms.write() = Some(latency);
                self.emit(SignalingEvent::LatencyUpdated(latency));
            }
            _ => debug!("Ignoring unexpected pong {}", timestamp),
        }
    }

    fn on_pong_timeout(&mut self) {
        self.outstanding_ping = None;
        self.ping_failures += 1;
        warn!(
            "Signaling pong timeout ({}/{})",
            self.ping_failures, self.options.max_ping_failures
        );

        if self.ping_failures >= self.options.max_ping_failures {
            warn!("Signaling socket unresponsive, reconnecting");
            self.backoff.reset();
            // A dead socket is not a short-lived one
            self.connected_since = None;
            self.on_socket_lost(Some("keep-alive timeout".to_string()));
        }
    }

    fn poll_peers(&mut self) {
        self.next_poll = Some(Instant::now() + self.poll_interval());
        if self.connection.is_some() {
            self.send(&SignalingMessage::GetDrones);
        }
    }

    fn clear_keepalive(&mut self) {
        self.next_ping = None;
        self.next_poll = None;
        self.outstanding_ping = None;
        self.ping_failures = 0;
    }

    fn clear_peers(&mut self) {
        if self.shared.peers.write().clear() {
            self.emit(SignalingEvent::ConnectedPeersChanged(Vec::new()));
        }
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.options.ping_interval_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.options.peer_poll_interval_ms)
    }

    fn set_status(&self, status: ConnectionStatus, text: &str) {
        {
            let mut current = self.shared.status.write();
            if current.0 == status && current.1 == text {
                return;
            }
            *current = (status, text.to_string());
        }
        self.emit(SignalingEvent::StatusChanged {
            status,
            text: text.to_string(),
        });
    }

    fn emit(&self, event: SignalingEvent) {
        self.shared.broadcast(event);
    }
}
