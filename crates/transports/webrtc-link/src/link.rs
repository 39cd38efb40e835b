//! Link facade
//!
//! [`WebRtcLink`] is the handle the application holds. Every operation is a
//! fire-and-forget request to the link's [`ConnectionWorker`], which runs on
//! its own thread with a single-threaded runtime.

use crate::config::LinkConfig;
use crate::peer::{PeerEngine, WebRtcEngine};
use crate::signaling::SignalingService;
use crate::worker::{
    ConnectionWorker, LinkEvent, LinkStats, WorkerCommand, WorkerHandle, WorkerState,
};
use crate::{Error, Result};
use bytes::Bytes;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "webrtc-link-worker";

/// Thread-safe handle to one ground-control link
pub struct WebRtcLink {
    target: String,
    signaling: Arc<dyn SignalingService>,
    worker: WorkerHandle,
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    thread: Option<JoinHandle<()>>,
    finished: Mutex<std_mpsc::Receiver<()>>,
    abort: AbortHandle,
    join_timeout: Duration,
}

impl WebRtcLink {
    /// Create a link backed by the webrtc-rs engine
    pub fn new(config: LinkConfig, signaling: Arc<dyn SignalingService>) -> Result<Self> {
        Self::with_engine(config, signaling, Arc::new(WebRtcEngine::new()))
    }

    /// Create a link with an explicit peer engine
    pub fn with_engine(
        config: LinkConfig,
        signaling: Arc<dyn SignalingService>,
        engine: Arc<dyn PeerEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::InternalError(format!("Failed to build worker runtime: {}", e)))?;

        let (worker, mut handle) = ConnectionWorker::new(&config, signaling.clone(), engine);
        let events = handle.take_events();

        let (abort, registration) = AbortHandle::new_pair();
        let (finished_tx, finished) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                if runtime
                    .block_on(Abortable::new(worker.run(), registration))
                    .is_err()
                {
                    warn!("Link worker was cancelled");
                }
                let _ = finished_tx.send(());
            })
            .map_err(|e| {
                signaling.unsubscribe(handle.subscription());
                Error::IoError(e)
            })?;

        info!(
            gcs_id = %config.identity.gcs_id,
            "Created link to {}", config.identity.target_drone_id
        );

        Ok(Self {
            target: config.identity.target_drone_id.clone(),
            signaling,
            worker: handle,
            events: Mutex::new(events),
            thread: Some(thread),
            finished: Mutex::new(finished),
            abort,
            join_timeout: config.options.join_timeout(),
        })
    }

    /// Target peer id of this link
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Start pairing with the target
    pub fn connect_link(&self) {
        self.post(WorkerCommand::Start);
    }

    /// Drop the current attempt and pair again with a fresh retry budget
    pub fn reconnect_link(&self) {
        self.post(WorkerCommand::Reconnect);
    }

    pub fn disconnect(&self) {
        self.post(WorkerCommand::Disconnect);
    }

    /// Queue bytes for the control channel
    ///
    /// Bytes written while the link is not connected are dropped by the
    /// worker with a warning.
    pub fn write_bytes(&self, data: impl Into<Bytes>) {
        self.post(WorkerCommand::WriteBytes(data.into()));
    }

    /// Queue a text message for the secondary channel
    pub fn send_custom_message(&self, message: impl Into<String>) {
        self.post(WorkerCommand::SendCustom(message.into()));
    }

    /// Control channel open and worker operational
    pub fn is_connected(&self) -> bool {
        self.worker.shared().control_open() && self.worker.state().is_operational()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.worker.state() == WorkerState::Reconnecting
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Human-readable status text
    pub fn status(&self) -> watch::Receiver<String> {
        self.worker.status()
    }

    /// Statistics snapshots, republished when they change
    pub fn stats(&self) -> watch::Receiver<LinkStats> {
        self.worker.stats()
    }

    /// Take the link event stream; later calls return `None`
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.lock().take()
    }

    fn post(&self, cmd: WorkerCommand) {
        if let Err(e) = self.worker.send(cmd) {
            warn!("{}", e);
        }
    }
}

impl Drop for WebRtcLink {
    fn drop(&mut self) {
        debug!("Dropping link to {}", self.target);

        self.signaling.unsubscribe(self.worker.subscription());
        let _ = self.worker.send(WorkerCommand::Shutdown);

        let Some(thread) = self.thread.take() else {
            return;
        };

        match self.finished.get_mut().recv_timeout(self.join_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Link worker thread panicked");
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                self.abort.abort();
                error!(
                    "Link worker did not stop within {:?}, detaching thread",
                    self.join_timeout
                );
            }
        }
    }
}
