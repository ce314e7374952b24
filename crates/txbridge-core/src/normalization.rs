use crate::{
    error::BridgeError,
    types::{
        BackendTarget, BridgeEvent, StoreKind, TransactionErrorPayload, TransactionEvent,
        TransactionEventKind, TreeSnapshot,
    },
};

/// Coordinator-side flags collected while the backend retry loop ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptFlags {
    /// A pause point hit the handshake deadline.
    pub timeout: bool,
    /// The worker was interrupted while waiting.
    pub interrupted: bool,
    /// The session was disposed by the caller.
    pub disposed: bool,
}

/// Tree-store backend outcome before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeCompletion {
    pub committed: bool,
    pub snapshot: TreeSnapshot,
}

/// Build the terminal event kind of a tree-store session.
///
/// A backend error wins over the coordinator flags; a timeout or interrupt
/// without a backend error is still reported as an error, never as complete.
pub fn tree_terminal(
    outcome: Result<TreeCompletion, BridgeError>,
    flags: AttemptFlags,
) -> TransactionEventKind {
    let (committed, error) = match outcome {
        Ok(completion) if !flags.timeout && !flags.interrupted => {
            return TransactionEventKind::Complete {
                committed: completion.committed,
                snapshot: Some(completion.snapshot),
            };
        }
        Ok(completion) => (completion.committed, coordination_error(StoreKind::Tree, flags)),
        Err(error) => (false, error),
    };

    TransactionEventKind::Error {
        error: error.into(),
        committed,
        timeout: flags.timeout,
        interrupted: flags.interrupted,
    }
}

/// Build the terminal event kind of a document-store session.
///
/// Document transactions never report a snapshot; success means committed.
/// The coordinator aborts the transaction function itself on timeout,
/// interrupt or disposal, so those flags take precedence over the abort
/// error the backend hands back.
pub fn document_terminal(
    outcome: Result<(), BridgeError>,
    flags: AttemptFlags,
) -> TransactionEventKind {
    let error = if flags.timeout || flags.interrupted {
        coordination_error(StoreKind::Document, flags)
    } else if flags.disposed {
        BridgeError::disposed(StoreKind::Document)
    } else {
        match outcome {
            Ok(()) => {
                return TransactionEventKind::Complete {
                    committed: true,
                    snapshot: None,
                };
            }
            Err(error) => error,
        }
    };

    TransactionEventKind::Error {
        error: error.into(),
        committed: false,
        timeout: flags.timeout,
        interrupted: flags.interrupted,
    }
}

fn coordination_error(store: StoreKind, flags: AttemptFlags) -> BridgeError {
    if flags.timeout {
        BridgeError::timeout(store)
    } else {
        BridgeError::interrupted(store)
    }
}

/// Wrap an event kind with its session scope.
pub fn transaction_event(
    session_id: impl Into<String>,
    store: StoreKind,
    target: &BackendTarget,
    kind: TransactionEventKind,
) -> BridgeEvent {
    BridgeEvent::Transaction(TransactionEvent {
        session_id: session_id.into(),
        store,
        target: target.clone(),
        kind,
    })
}

/// Convert a fire-and-forget command failure into a broadcast event.
pub fn command_failed(session_id: Option<String>, error: BridgeError) -> BridgeEvent {
    let TransactionErrorPayload { code, message } = error.into();
    BridgeEvent::CommandFailed {
        session_id,
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::BridgeErrorCategory, value::TaggedValue};

    fn completion(committed: bool) -> TreeCompletion {
        TreeCompletion {
            committed,
            snapshot: TreeSnapshot {
                key: Some("counter".into()),
                exists: true,
                has_children: false,
                children_count: 0,
                child_keys: Vec::new(),
                value: TaggedValue::Integer(2),
                priority: None,
            },
        }
    }

    #[test]
    fn tree_success_maps_to_complete() {
        match tree_terminal(Ok(completion(true)), AttemptFlags::default()) {
            TransactionEventKind::Complete {
                committed,
                snapshot,
            } => {
                assert!(committed);
                assert_eq!(
                    snapshot.expect("snapshot should be present").value,
                    TaggedValue::Integer(2)
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tree_timeout_maps_to_error_even_without_backend_error() {
        let flags = AttemptFlags {
            timeout: true,
            ..AttemptFlags::default()
        };
        match tree_terminal(Ok(completion(false)), flags) {
            TransactionEventKind::Error {
                error,
                committed,
                timeout,
                interrupted,
            } => {
                assert_eq!(error.code, "database/internal-timeout");
                assert!(!committed);
                assert!(timeout);
                assert!(!interrupted);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn backend_error_wins_over_flags() {
        let flags = AttemptFlags {
            interrupted: true,
            ..AttemptFlags::default()
        };
        let error = BridgeError::new(
            BridgeErrorCategory::Store,
            "database/max-retries",
            "too many retries",
        );
        match tree_terminal(Err(error), flags) {
            TransactionEventKind::Error {
                error, interrupted, ..
            } => {
                assert_eq!(error.code, "database/max-retries");
                assert!(interrupted);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn document_dispose_maps_to_aborted() {
        let flags = AttemptFlags {
            disposed: true,
            ..AttemptFlags::default()
        };
        match document_terminal(Ok(()), flags) {
            TransactionEventKind::Error { error, .. } => {
                assert_eq!(error.code, "firestore/aborted")
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(
            document_terminal(Ok(()), AttemptFlags::default()),
            TransactionEventKind::Complete {
                committed: true,
                snapshot: None,
            }
        );
    }

    #[test]
    fn document_timeout_overrides_self_inflicted_abort() {
        let flags = AttemptFlags {
            timeout: true,
            ..AttemptFlags::default()
        };
        let aborted = BridgeError::new(
            BridgeErrorCategory::Store,
            "firestore/aborted",
            "transaction function aborted",
        );
        match document_terminal(Err(aborted), flags) {
            TransactionEventKind::Error { error, timeout, .. } => {
                assert_eq!(error.code, "firestore/deadline-exceeded");
                assert!(timeout);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn command_failure_carries_code() {
        match command_failed(Some("s1".into()), BridgeError::session_not_found("s1")) {
            BridgeEvent::CommandFailed {
                session_id, code, ..
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(code, "internal-error");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
