//! Connection worker state machine
//!
//! [`WorkerState`] is the single source of truth for what a worker is doing.
//! It lives in an [`AtomicWorkerState`] and only changes through a
//! compare-and-swap checked against [`WorkerState::can_transition_to`], so two
//! racing transitions can never both succeed.

use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

/// Lifecycle state of a connection worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// Not started, or fully stopped
    Idle = 0,
    /// `start()` accepted, registration pending
    Starting = 1,
    /// Registration sent to the signaling server
    Connecting = 2,
    /// Registered, waiting for the remote offer
    WaitingForOffer = 3,
    /// Offer applied, waiting for the control channel to open
    EstablishingPeer = 4,
    /// Control channel open
    Connected = 5,
    /// User-initiated teardown in progress
    Disconnecting = 6,
    /// Backoff timer armed for the next attempt
    Reconnecting = 7,
    /// Releasing resources before leaving the link
    CleaningUp = 8,
    /// Terminal
    Shutdown = 9,
}

impl WorkerState {
    /// Every state, in declaration order
    pub const ALL: [WorkerState; 10] = [
        WorkerState::Idle,
        WorkerState::Starting,
        WorkerState::Connecting,
        WorkerState::WaitingForOffer,
        WorkerState::EstablishingPeer,
        WorkerState::Connected,
        WorkerState::Disconnecting,
        WorkerState::Reconnecting,
        WorkerState::CleaningUp,
        WorkerState::Shutdown,
    ];

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Starting,
            2 => WorkerState::Connecting,
            3 => WorkerState::WaitingForOffer,
            4 => WorkerState::EstablishingPeer,
            5 => WorkerState::Connected,
            6 => WorkerState::Disconnecting,
            7 => WorkerState::Reconnecting,
            8 => WorkerState::CleaningUp,
            _ => WorkerState::Shutdown,
        }
    }

    /// Check the transition legality table
    ///
    /// `CleaningUp` and `Shutdown` are reachable from every other state except
    /// `Shutdown`, which has no outgoing transitions. Self-transitions are never
    /// legal.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;

        if self == next || self == Shutdown {
            return false;
        }

        if matches!(next, CleaningUp | Shutdown) {
            return true;
        }

        match self {
            Idle => matches!(next, Starting),
            Starting => matches!(next, Connecting | Disconnecting | Reconnecting),
            Connecting => matches!(next, WaitingForOffer | Disconnecting | Reconnecting),
            WaitingForOffer => matches!(next, EstablishingPeer | Disconnecting | Reconnecting),
            EstablishingPeer => matches!(next, Connected | Disconnecting | Reconnecting),
            Connected => matches!(next, Disconnecting | Reconnecting),
            Disconnecting => matches!(next, Idle),
            Reconnecting => matches!(next, Starting | Connecting | Disconnecting),
            CleaningUp => matches!(next, Idle | Reconnecting),
            Shutdown => false,
        }
    }

    /// The worker is doing useful work and has not begun tearing down
    pub fn is_operational(self) -> bool {
        !matches!(
            self,
            WorkerState::Shutdown | WorkerState::Disconnecting | WorkerState::CleaningUp
        )
    }

    /// The worker is on its way out of the link
    pub fn is_shutting_down(self) -> bool {
        !self.is_operational()
    }

    /// A pairing attempt is in flight (between start and connected)
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            WorkerState::Starting
                | WorkerState::Connecting
                | WorkerState::WaitingForOffer
                | WorkerState::EstablishingPeer
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically shared [`WorkerState`]
///
/// Readable from any thread; mutated only by [`AtomicWorkerState::transition`].
#[derive(Debug)]
pub struct AtomicWorkerState {
    inner: AtomicU8,
}

impl Default for AtomicWorkerState {
    fn default() -> Self {
        Self::new(WorkerState::Idle)
    }
}

impl AtomicWorkerState {
    pub fn new(initial: WorkerState) -> Self {
        Self {
            inner: AtomicU8::new(initial as u8),
        }
    }

    /// Current state
    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn is(&self, state: WorkerState) -> bool {
        self.load() == state
    }

    /// Move from `from` to `to` if the table allows it and nobody else moved first
    ///
    /// A lost race is reported as [`Error::TransitionConflict`] and is not
    /// retried.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        if !from.can_transition_to(to) {
            warn!("Rejected illegal worker transition {} -> {}", from, to);
            return Err(Error::IllegalTransition { from, to });
        }

        match self
            .inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!("Worker state {} -> {}", from, to);
                Ok(())
            }
            Err(actual) => {
                let actual = WorkerState::from_u8(actual);
                debug!(
                    "Worker transition {} -> {} abandoned, state is {}",
                    from, to, actual
                );
                Err(Error::TransitionConflict {
                    expected: from,
                    actual,
                    to,
                })
            }
        }
    }

    /// Move from whatever the current state is to `to`
    ///
    /// Single attempt: the current state is read once and used as the CAS
    /// expectation.
    pub fn advance(&self, to: WorkerState) -> Result<()> {
        self.transition(self.load(), to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    fn legal_pairs() -> Vec<(WorkerState, WorkerState)> {
        let mut pairs = Vec::new();
        for from in WorkerState::ALL {
            for to in WorkerState::ALL {
                if from.can_transition_to(to) {
                    pairs.push((from, to));
                }
            }
        }
        pairs
    }

    #[test]
    fn test_table_rows() {
        use WorkerState::*;

        assert!(Idle.can_transition_to(Starting));
        assert!(!Idle.can_transition_to(Connecting));
        assert!(Starting.can_transition_to(Reconnecting));
        assert!(Connecting.can_transition_to(WaitingForOffer));
        assert!(!Connecting.can_transition_to(EstablishingPeer));
        assert!(WaitingForOffer.can_transition_to(EstablishingPeer));
        assert!(EstablishingPeer.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Idle));
        assert!(Disconnecting.can_transition_to(Idle));
        assert!(!Disconnecting.can_transition_to(Starting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(!Reconnecting.can_transition_to(Idle));
        assert!(CleaningUp.can_transition_to(Idle));
        assert!(CleaningUp.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_escape_hatches() {
        for from in WorkerState::ALL {
            if from == WorkerState::Shutdown {
                continue;
            }
            assert!(from.can_transition_to(WorkerState::Shutdown), "{from} -> Shutdown");
            if from != WorkerState::CleaningUp {
                assert!(from.can_transition_to(WorkerState::CleaningUp), "{from} -> CleaningUp");
            }
        }
    }

    #[test]
    fn test_shutdown_is_terminal() {
        for to in WorkerState::ALL {
            assert!(!WorkerState::Shutdown.can_transition_to(to));
        }
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let state = AtomicWorkerState::new(WorkerState::Idle);
        let err = state
            .transition(WorkerState::Idle, WorkerState::Connected)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(state.load(), WorkerState::Idle);
    }

    #[test]
    fn test_stale_expectation_conflicts() {
        let state = AtomicWorkerState::new(WorkerState::Connecting);
        let err = state
            .transition(WorkerState::Starting, WorkerState::Connecting)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TransitionConflict {
                actual: WorkerState::Connecting,
                ..
            }
        ));
        assert_eq!(state.load(), WorkerState::Connecting);
    }

    #[test]
    fn test_every_legal_pair_wins_exactly_once_under_contention() {
        const THREADS: usize = 8;

        for (from, to) in legal_pairs() {
            let state = Arc::new(AtomicWorkerState::new(from));
            let wins = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let wins = Arc::clone(&wins);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        if state.transition(from, to).is_ok() {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1, "{from} -> {to}");
            assert_eq!(state.load(), to);
        }
    }

    #[test]
    fn test_every_illegal_pair_always_fails() {
        for from in WorkerState::ALL {
            for to in WorkerState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let state = AtomicWorkerState::new(from);
                assert!(state.transition(from, to).is_err(), "{from} -> {to}");
                assert_eq!(state.load(), from);
            }
        }
    }

    #[test]
    fn test_operational_states() {
        assert!(WorkerState::Connected.is_operational());
        assert!(WorkerState::Reconnecting.is_operational());
        assert!(!WorkerState::Disconnecting.is_operational());
        assert!(!WorkerState::CleaningUp.is_operational());
        assert!(!WorkerState::Shutdown.is_operational());
        assert!(WorkerState::WaitingForOffer.is_negotiating());
        assert!(!WorkerState::Connected.is_negotiating());
    }
}
