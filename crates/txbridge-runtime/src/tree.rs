//! Tree-store transaction coordinator.
//!
//! Each session owns one blocking worker that runs the store's optimistic
//! retry loop. Every attempt publishes the current value as an `update`
//! event and parks on the session handshake until the caller answers with
//! `SubmitTreeVerdict`, the deadline passes, or the session is torn down.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use txbridge_core::{
    AttemptFlags, BackendTarget, BridgeError, BridgeEvent, HandshakeTiming, SessionStateMachine,
    SignalOutcome, StoreKind, TaggedValue, TransactionEventKind, TreeCompletion, TreeNode,
    WaitOutcome, codec, tree_terminal,
};
use txbridge_store::{StoreProvider, TreeAttempt, TreeStore};

use crate::{emit, registry::SessionRegistry, session::TransactionSession};

type TreeSession = TransactionSession<TaggedValue>;

/// Starts tree sessions and routes verdicts to their paused workers.
#[derive(Clone)]
pub struct TreeCoordinator {
    provider: Arc<dyn StoreProvider>,
    timing: HandshakeTiming,
    sessions: Arc<SessionRegistry<TreeSession>>,
    events: broadcast::Sender<BridgeEvent>,
    workers: TaskTracker,
}

impl TreeCoordinator {
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        timing: HandshakeTiming,
        events: broadcast::Sender<BridgeEvent>,
        workers: TaskTracker,
    ) -> Self {
        Self {
            provider,
            timing,
            sessions: Arc::new(SessionRegistry::default()),
            events,
            workers,
        }
    }

    /// Register `session_id` and start the backend retry loop on a blocking
    /// worker. Must be called from within a Tokio runtime.
    pub fn begin(
        &self,
        session_id: &str,
        target: BackendTarget,
        path: String,
        apply_locally: bool,
    ) -> Result<(), BridgeError> {
        let store = self.provider.tree_store(&target)?;
        let session = Arc::new(TreeSession::new(
            session_id,
            StoreKind::Tree,
            target,
            self.timing,
        ));
        self.sessions.insert(session_id, Arc::clone(&session))?;

        info!(session_id, path = %path, apply_locally, "tree transaction started");
        let worker = TreeWorker {
            session,
            store,
            path,
            apply_locally,
            events: self.events.clone(),
            sessions: Arc::clone(&self.sessions),
        };
        self.workers.spawn_blocking(move || worker.run());
        Ok(())
    }

    /// Hand the caller's verdict to the paused attempt. A second verdict for
    /// the same attempt is dropped by the handshake.
    pub fn submit_verdict(
        &self,
        session_id: &str,
        value: TaggedValue,
        abort: bool,
    ) -> Result<(), BridgeError> {
        let session = self.sessions.get(session_id)?;
        if session.handshake().signal_verdict(value, abort) == SignalOutcome::Accepted {
            debug!(session_id, abort, "tree verdict accepted");
        }
        Ok(())
    }

    /// Forget the session and abort its pending attempt, if any. Unknown
    /// or already finished sessions are a no-op.
    pub fn dispose(&self, session_id: &str) -> Result<(), BridgeError> {
        let Some(session) = self.sessions.take(session_id)? else {
            debug!(session_id, "tree transaction already released");
            return Ok(());
        };
        session.dispose();
        info!(session_id, "tree transaction disposed");
        Ok(())
    }

    /// Wake every paused worker with an interrupt.
    pub fn interrupt_all(&self) {
        for session in self.sessions.all() {
            debug!(session_id = session.id(), "interrupting tree transaction");
            session.handshake().interrupt();
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }
}

struct TreeWorker {
    session: Arc<TreeSession>,
    store: Arc<dyn TreeStore>,
    path: String,
    apply_locally: bool,
    events: broadcast::Sender<BridgeEvent>,
    sessions: Arc<SessionRegistry<TreeSession>>,
}

impl TreeWorker {
    fn run(self) {
        let mut flags = AttemptFlags::default();
        let outcome = self.store.run_transaction(
            &self.path,
            self.apply_locally,
            &mut |current: &TreeNode| self.attempt(current, &mut flags),
        );
        flags.disposed = self.session.is_disposed();
        self.session.advance(SessionStateMachine::on_finished);

        let outcome = outcome
            .map(|commit| TreeCompletion {
                committed: commit.committed,
                snapshot: codec::tree::snapshot(&self.path, &commit.node),
            })
            .map_err(BridgeError::from);
        let kind = tree_terminal(outcome, flags);
        match &kind {
            TransactionEventKind::Error { error, .. } => warn!(
                session_id = self.session.id(),
                code = %error.code,
                elapsed_ms = self.session.elapsed_ms(),
                "tree transaction failed"
            ),
            _ => info!(
                session_id = self.session.id(),
                elapsed_ms = self.session.elapsed_ms(),
                "tree transaction finished"
            ),
        }

        emit(&self.events, self.session.event(kind));
        self.sessions.release(self.session.id(), &self.session);
    }

    fn attempt(&self, current: &TreeNode, flags: &mut AttemptFlags) -> TreeAttempt {
        let session_id = self.session.id();
        let handshake = self.session.handshake();

        let attempt = self
            .session
            .advance(SessionStateMachine::on_attempt_started)
            .unwrap_or_default();
        handshake.reset();
        let update = TransactionEventKind::Update {
            value: Some(codec::tree::encode(current)),
        };
        emit(&self.events, self.session.event(update));
        self.session.advance(SessionStateMachine::on_published);
        self.session.advance(SessionStateMachine::on_awaiting_verdict);
        debug!(session_id, attempt, "tree attempt awaiting verdict");

        let outcome = handshake.wait();
        self.session.advance(SessionStateMachine::on_verdict_resolved);
        match outcome {
            WaitOutcome::Verdict(value) => TreeAttempt::Commit(codec::tree::decode(&value)),
            WaitOutcome::Aborted => TreeAttempt::Abort,
            WaitOutcome::TimedOut => {
                warn!(session_id, attempt, "tree attempt timed out waiting for a verdict");
                flags.timeout = true;
                TreeAttempt::Abort
            }
            WaitOutcome::Interrupted => {
                debug!(session_id, attempt, "tree attempt interrupted");
                flags.interrupted = true;
                TreeAttempt::Abort
            }
        }
    }
}
