use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{state_machine::SessionState, types::StoreKind};

/// Code reported for caller misuse such as an unknown session id.
pub const INTERNAL_ERROR_CODE: &str = "internal-error";

/// Broad error category used by callers to tell failure sources apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BridgeErrorCategory {
    /// The backend store rejected the operation; code/message are verbatim.
    Store,
    /// Deadline exceeded, interrupted wait, or another handshake-level failure.
    Coordination,
    /// Unknown/disposed session or an otherwise invalid request.
    Caller,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct BridgeError {
    /// High-level error category.
    pub category: BridgeErrorCategory,
    /// Stable machine-readable error code, e.g. `database/max-retries`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl BridgeError {
    pub fn new(
        category: BridgeErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// A command referenced a session that is not (or no longer) live.
    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            BridgeErrorCategory::Caller,
            INTERNAL_ERROR_CODE,
            format!(
                "an internal error occurred whilst attempting to find a native \
                 transaction by id '{session_id}'"
            ),
        )
    }

    /// A begin command reused the id of a live session.
    pub fn session_exists(session_id: &str) -> Self {
        Self::new(
            BridgeErrorCategory::Caller,
            "session_exists",
            format!("transaction '{session_id}' is already running"),
        )
    }

    /// A document read was requested while no attempt is paused.
    pub fn not_paused(session_id: &str) -> Self {
        Self::new(
            BridgeErrorCategory::Caller,
            INTERNAL_ERROR_CODE,
            format!("transaction '{session_id}' is not waiting for the caller"),
        )
    }

    /// The caller never answered within the handshake deadline.
    pub fn timeout(store: StoreKind) -> Self {
        let code = match store {
            StoreKind::Tree => "database/internal-timeout",
            StoreKind::Document => "firestore/deadline-exceeded",
        };
        Self::new(
            BridgeErrorCategory::Coordination,
            code,
            "a timeout occurred whilst waiting for the caller to send transaction updates",
        )
    }

    /// The waiting worker was interrupted, for example by runtime shutdown.
    pub fn interrupted(store: StoreKind) -> Self {
        let code = match store {
            StoreKind::Tree => "database/internal-interrupted",
            StoreKind::Document => "firestore/aborted",
        };
        Self::new(
            BridgeErrorCategory::Coordination,
            code,
            "the transaction worker was interrupted whilst waiting for the caller",
        )
    }

    /// The session was disposed while a document attempt was still running.
    pub fn disposed(store: StoreKind) -> Self {
        Self::new(
            BridgeErrorCategory::Coordination,
            format!("{}/aborted", store.service()),
            "the transaction was disposed before it completed",
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            BridgeErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while transaction is in state {current:?}"),
        )
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(BridgeErrorCategory::Internal, code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_codes_carry_service_prefix() {
        assert_eq!(
            BridgeError::timeout(StoreKind::Tree).code,
            "database/internal-timeout"
        );
        assert_eq!(
            BridgeError::timeout(StoreKind::Document).code,
            "firestore/deadline-exceeded"
        );
        assert_eq!(
            BridgeError::interrupted(StoreKind::Document).code,
            "firestore/aborted"
        );
        assert_eq!(
            BridgeError::timeout(StoreKind::Tree).category,
            BridgeErrorCategory::Coordination
        );
    }

    #[test]
    fn unknown_session_is_reported_as_internal_error() {
        let err = BridgeError::session_not_found("tx-9");
        assert_eq!(err.code, INTERNAL_ERROR_CODE);
        assert_eq!(err.category, BridgeErrorCategory::Caller);
        assert_eq!(
            err.message,
            "an internal error occurred whilst attempting to find a native transaction by id 'tx-9'"
        );
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = BridgeError::invalid_state(SessionState::Done, "publish");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, BridgeErrorCategory::Internal);
    }
}
