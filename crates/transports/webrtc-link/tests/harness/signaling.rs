//! Scripted signaling service

use gcs_webrtc_link::signaling::SubscriptionId;
use gcs_webrtc_link::{SignalingEvent, SignalingMessage, SignalingService};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// One call made by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingCall {
    Register { local_id: String, target_id: String },
    Unregister { local_id: String },
    Send(SignalingMessage),
}

#[derive(Default)]
pub struct ScriptedSignaling {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<SignalingEvent>>>,
    next_id: AtomicU64,
    calls: Mutex<Vec<SignalingCall>>,
    connected: AtomicBool,
}

impl ScriptedSignaling {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Deliver an event to every subscriber
    pub fn inject(&self, event: SignalingEvent) {
        for tx in self.subscribers.lock().values() {
            let _ = tx.send(event.clone());
        }
    }

    pub fn inject_message(&self, message: SignalingMessage) {
        self.inject(SignalingEvent::Message(message));
    }

    pub fn calls(&self) -> Vec<SignalingCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn register_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SignalingCall::Register { .. }))
            .count()
    }

    pub fn unregister_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, SignalingCall::Unregister { .. }))
            .count()
    }

    /// Messages sent through `send_message`
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                SignalingCall::Send(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SignalingService for ScriptedSignaling {
    fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SignalingEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }

    fn send_message(&self, message: SignalingMessage) {
        self.calls.lock().push(SignalingCall::Send(message));
    }

    fn register_peer(&self, local_id: &str, target_id: &str) {
        self.calls.lock().push(SignalingCall::Register {
            local_id: local_id.to_string(),
            target_id: target_id.to_string(),
        });
    }

    fn unregister_peer(&self, local_id: &str) {
        self.calls.lock().push(SignalingCall::Unregister {
            local_id: local_id.to_string(),
        });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
