//! Remote ICE candidate gating
//!
//! Candidates must never reach the engine before the remote description is
//! set. [`CandidateGate`] keeps the "remote description set" fact and the
//! pending queue under one lock so that an offer being applied and a candidate
//! arriving cannot interleave badly.

use crate::peer::IceCandidate;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Outcome of offering a candidate to the gate
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Remote description is set, apply now
    Apply(IceCandidate),
    /// Held until the remote description is applied
    Queued {
        /// Queue length after insertion
        pending: usize,
    },
}

#[derive(Debug, Default)]
struct GateInner {
    remote_description_set: bool,
    pending: VecDeque<IceCandidate>,
}

/// Ordered holding area for early ICE candidates
#[derive(Debug, Default)]
pub struct CandidateGate {
    inner: Mutex<GateInner>,
}

impl CandidateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the candidate, or hand it back for immediate application
    pub fn admit(&self, candidate: IceCandidate) -> Admission {
        let mut inner = self.inner.lock();
        if inner.remote_description_set {
            Admission::Apply(candidate)
        } else {
            inner.pending.push_back(candidate);
            Admission::Queued {
                pending: inner.pending.len(),
            }
        }
    }

    /// Record that the remote description is applied and drain the queue
    ///
    /// Returns queued candidates in arrival order. The queue is empty
    /// afterwards and later candidates bypass it.
    pub fn open(&self) -> Vec<IceCandidate> {
        let mut inner = self.inner.lock();
        inner.remote_description_set = true;
        inner.pending.drain(..).collect()
    }

    pub fn remote_description_set(&self) -> bool {
        self.inner.lock().remote_description_set
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Forget queued candidates and close the gate again
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.remote_description_set = false;
        inner.pending.clear();
    }
}
