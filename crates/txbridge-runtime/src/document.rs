//! Document-store transaction coordinator.
//!
//! The store's transaction function parks on the session handshake until the
//! caller sends its operation buffer. While parked, the attempt's live
//! transaction handle is published so `GetDocument` reads go through it.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use txbridge_core::{
    AttemptFlags, BackendTarget, BridgeError, BridgeEvent, DocumentSnapshotPayload,
    HandshakeTiming, SessionStateMachine, SignalOutcome, StoreKind, TransactionCommand,
    TransactionCommandKind, TransactionEventKind, WaitOutcome, codec::typemap, document_terminal,
};
use txbridge_store::{DocumentStore, DocumentTransaction, StoreError, StoreErrorCode, StoreProvider};

use crate::{emit, registry::SessionRegistry, session::TransactionSession};

/// Document session plus the transaction handle of its paused attempt.
struct DocumentSession {
    inner: TransactionSession<Vec<TransactionCommand>>,
    current: Mutex<Option<Arc<dyn DocumentTransaction>>>,
}

impl DocumentSession {
    fn new(session_id: &str, target: BackendTarget, timing: HandshakeTiming) -> Self {
        Self {
            inner: TransactionSession::new(session_id, StoreKind::Document, target, timing),
            current: Mutex::new(None),
        }
    }

    fn set_current(&self, transaction: Option<Arc<dyn DocumentTransaction>>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = transaction;
    }

    fn current(&self) -> Option<Arc<dyn DocumentTransaction>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Starts document sessions, forwards operation buffers and serves reads.
#[derive(Clone)]
pub struct DocumentCoordinator {
    provider: Arc<dyn StoreProvider>,
    timing: HandshakeTiming,
    sessions: Arc<SessionRegistry<DocumentSession>>,
    events: broadcast::Sender<BridgeEvent>,
    workers: TaskTracker,
}

impl DocumentCoordinator {
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

    /// Register `session_id` and run the store transaction on a blocking
    /// worker. Must be called from within a Tokio runtime.
    pub fn begin(&self, session_id: &str, target: BackendTarget) -> Result<(), BridgeError> {
        let store = self.provider.document_store(&target)?;
        let session = Arc::new(DocumentSession::new(session_id, target, self.timing));
        self.sessions.insert(session_id, Arc::clone(&session))?;

        info!(session_id, "document transaction started");
        let worker = DocumentWorker {
            session,
            store,
            events: self.events.clone(),
            sessions: Arc::clone(&self.sessions),
        };
        self.workers.spawn_blocking(move || worker.run());
        Ok(())
    }

    /// Release the paused attempt with the caller's buffered writes.
    pub fn apply_buffer(
        &self,
        session_id: &str,
        commands: Vec<TransactionCommand>,
    ) -> Result<(), BridgeError> {
        let session = self.sessions.get(session_id)?;
        let count = commands.len();
        if session.inner.handshake().signal_verdict(commands, false) == SignalOutcome::Accepted {
            debug!(session_id, commands = count, "document buffer accepted");
        }
        Ok(())
    }

    /// Read `path` through the paused attempt's transaction.
    ///
    /// The handshake deadline is refreshed before and after the read so a
    /// slow backend read does not count against the caller.
    pub async fn get_document(
        &self,
        session_id: &str,
        path: String,
    ) -> Result<DocumentSnapshotPayload, BridgeError> {
        let session = self.sessions.get(session_id)?;
        let transaction = session
            .current()
            .ok_or_else(|| BridgeError::not_paused(session_id))?;

        let handshake = session.inner.handshake();
        handshake.refresh_deadline();
        let snapshot = self
            .workers
            .spawn_blocking(move || transaction.get(&path))
            .await
            .map_err(|err| BridgeError::internal("read_task_failed", err.to_string()))??;
        handshake.refresh_deadline();

        debug!(session_id, path = %snapshot.path, exists = snapshot.exists(), "document read");
        Ok(typemap::encode_snapshot(&snapshot))
    }

    /// Forget the session and abort its pending attempt, if any. Unknown
    /// or already finished sessions are a no-op.
    pub fn dispose(&self, session_id: &str) -> Result<(), BridgeError> {
        let Some(session) = self.sessions.take(session_id)? else {
            debug!(session_id, "document transaction already released");
            return Ok(());
        };
        session.inner.dispose();
        info!(session_id, "document transaction disposed");
        Ok(())
    }

    /// Wake every paused worker with an interrupt.
    pub fn interrupt_all(&self) {
        for session in self.sessions.all() {
            debug!(session_id = session.inner.id(), "interrupting document transaction");
            session.inner.handshake().interrupt();
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }
}

struct DocumentWorker {
    session: Arc<DocumentSession>,
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<BridgeEvent>,
    sessions: Arc<SessionRegistry<DocumentSession>>,
}

impl DocumentWorker {
    fn run(self) {
        let inner = &self.session.inner;
        let mut flags = AttemptFlags::default();
        let outcome = self
            .store
            .run_transaction(&mut |transaction: Arc<dyn DocumentTransaction>| {
                self.attempt(transaction, &mut flags)
            });
        self.session.set_current(None);
        flags.disposed = inner.is_disposed();
        inner.advance(SessionStateMachine::on_finished);

        let kind = document_terminal(outcome.map_err(BridgeError::from), flags);
        match &kind {
            TransactionEventKind::Error { error, .. } => warn!(
                session_id = inner.id(),
                code = %error.code,
                elapsed_ms = inner.elapsed_ms(),
                "document transaction failed"
            ),
            _ => info!(
                session_id = inner.id(),
                elapsed_ms = inner.elapsed_ms(),
                "document transaction committed"
            ),
        }

        emit(&self.events, inner.event(kind));
        self.sessions.release(inner.id(), &self.session);
    }

    fn attempt(
        &self,
        transaction: Arc<dyn DocumentTransaction>,
        flags: &mut AttemptFlags,
    ) -> Result<(), StoreError> {
        let inner = &self.session.inner;
        let session_id = inner.id();
        let handshake = inner.handshake();

        let attempt = inner
            .advance(SessionStateMachine::on_attempt_started)
            .unwrap_or_default();
        handshake.reset();
        self.session.set_current(Some(Arc::clone(&transaction)));
        emit(
            &self.events,
            inner.event(TransactionEventKind::Update { value: None }),
        );
        inner.advance(SessionStateMachine::on_published);
        inner.advance(SessionStateMachine::on_awaiting_verdict);
        debug!(session_id, attempt, "document attempt awaiting buffer");

        let outcome = handshake.wait();
        self.session.set_current(None);
        inner.advance(SessionStateMachine::on_verdict_resolved);
        match outcome {
            WaitOutcome::Verdict(commands) => replay(transaction.as_ref(), &commands),
            WaitOutcome::Aborted => Err(StoreError::document(
                StoreErrorCode::Aborted,
                "transaction aborted",
            )),
            WaitOutcome::TimedOut => {
                warn!(session_id, attempt, "document attempt timed out waiting for a buffer");
                flags.timeout = true;
                Err(StoreError::document(
                    StoreErrorCode::DeadlineExceeded,
                    "timed out waiting for the operation buffer",
                ))
            }
            WaitOutcome::Interrupted => {
                debug!(session_id, attempt, "document attempt interrupted");
                flags.interrupted = true;
                Err(StoreError::document(
                    StoreErrorCode::Aborted,
                    "transaction worker interrupted",
                ))
            }
        }
    }
}

/// Apply the caller's buffer in order; the first failing write stops it.
fn replay(
    transaction: &dyn DocumentTransaction,
    commands: &[TransactionCommand],
) -> Result<(), StoreError> {
    for command in commands {
        match command.kind {
            TransactionCommandKind::Set => {
                transaction.set(&command.path, command.decoded_data(), command.options)?
            }
            TransactionCommandKind::Update => {
                transaction.update(&command.path, command.decoded_data())?
            }
            TransactionCommandKind::Delete => transaction.delete(&command.path)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use txbridge_core::{DocumentData, DocumentSnapshot, SetOptions, TaggedValue};

    use super::*;

    #[derive(Default)]
    struct RecordingTransaction {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingTransaction {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock").push(call);
        }
    }

    impl DocumentTransaction for RecordingTransaction {
        fn get(&self, path: &str) -> Result<DocumentSnapshot, StoreError> {
            Ok(DocumentSnapshot::missing(path))
        }

        fn set(
            &self,
            path: &str,
            data: DocumentData,
            options: SetOptions,
        ) -> Result<(), StoreError> {
            self.record(format!("set {path} {} merge={}", data.len(), options.merge));
            Ok(())
        }

        fn update(&self, path: &str, _data: DocumentData) -> Result<(), StoreError> {
            if path == "missing/doc" {
                return Err(StoreError::document(StoreErrorCode::NotFound, "no document"));
            }
            self.record(format!("update {path}"));
            Ok(())
        }

        fn delete(&self, path: &str) -> Result<(), StoreError> {
            self.record(format!("delete {path}"));
            Ok(())
        }
    }

    #[test]
    fn replays_commands_in_order() {
        let transaction = RecordingTransaction::default();
        let data = DocumentData::from([("x".to_owned(), TaggedValue::Integer(1))]);
        let commands = vec![
            TransactionCommand::set("/d1", &data, SetOptions { merge: true }),
            TransactionCommand::delete("/d2"),
            TransactionCommand::update("/d3", &data),
        ];

        replay(&transaction, &commands).expect("replay should work");
        assert_eq!(
            transaction.calls(),
            vec!["set /d1 1 merge=true", "delete /d2", "update /d3"]
        );
    }

    #[test]
    fn replay_stops_at_first_failure() {
        let transaction = RecordingTransaction::default();
        let commands = vec![
            TransactionCommand::update("missing/doc", &DocumentData::new()),
            TransactionCommand::delete("never/reached"),
        ];

        let err = replay(&transaction, &commands).expect_err("update should fail");
        assert_eq!(err.wire_code(), "firestore/not-found");
        assert!(transaction.calls().is_empty());
    }
}
