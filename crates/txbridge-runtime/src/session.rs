use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use tracing::warn;
use txbridge_core::{
    BackendTarget, BridgeError, BridgeEvent, Handshake, HandshakeTiming, SessionState,
    SessionStateMachine, StoreKind, TransactionEventKind, transaction_event,
};

/// Per-session state owned by a coordinator.
///
/// The backend worker drives the state machine; the dispatcher only touches
/// the handshake and the disposal flag.
#[derive(Debug)]
pub struct TransactionSession<V> {
    id: String,
    store: StoreKind,
    target: BackendTarget,
    started_at: Instant,
    handshake: Handshake<V>,
    machine: Mutex<SessionStateMachine>,
    disposed: AtomicBool,
}

impl<V> TransactionSession<V> {
    pub fn new(
        id: impl Into<String>,
        store: StoreKind,
        target: BackendTarget,
        timing: HandshakeTiming,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            target,
            started_at: Instant::now(),
            handshake: Handshake::new(timing),
            machine: Mutex::new(SessionStateMachine::default()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Wrap `kind` in an event addressed to this session.
    pub fn event(&self, kind: TransactionEventKind) -> BridgeEvent {
        transaction_event(self.id.as_str(), self.store, &self.target, kind)
    }

    pub fn handshake(&self) -> &Handshake<V> {
        &self.handshake
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Abort any pending wait and flag the session as disposed.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.handshake.force_abort();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    /// Apply one state-machine step. Invalid transitions are logged and
    /// never unwind into the backend's retry loop.
    pub fn advance<T>(
        &self,
        step: impl FnOnce(&mut SessionStateMachine) -> Result<T, BridgeError>,
    ) -> Option<T> {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        match step(&mut *machine) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    session_id = %self.id,
                    code = %err.code,
                    message = %err.message,
                    "unexpected transaction state transition"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use txbridge_core::WaitOutcome;

    use super::*;

    fn session() -> TransactionSession<i64> {
        TransactionSession::new(
            "s1",
            StoreKind::Tree,
            BackendTarget::default(),
            HandshakeTiming::new(Duration::from_millis(50), Duration::from_millis(5)),
        )
    }

    #[test]
    fn dispose_aborts_the_handshake() {
        let session = session();
        session.dispose();

        assert!(session.is_disposed());
        assert_eq!(session.handshake().wait(), WaitOutcome::Aborted);
    }

    #[test]
    fn advance_swallows_invalid_transitions() {
        let session = session();

        assert_eq!(session.advance(SessionStateMachine::on_attempt_started), Some(1));
        assert_eq!(session.advance(SessionStateMachine::on_verdict_resolved), None);
        assert_eq!(session.state(), SessionState::AwaitingAttempt);
    }
}
