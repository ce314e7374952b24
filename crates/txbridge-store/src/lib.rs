//! Backend collaborator interfaces for the transaction bridge.
//!
//! The coordinators only see these traits. [`memory`] provides optimistic
//! in-memory implementations used by tests and the smoke binary.

use std::sync::Arc;

use thiserror::Error;
use txbridge_core::{
    BackendTarget, BridgeError, BridgeErrorCategory, DocumentData, DocumentSnapshot, SetOptions,
    StoreKind, TreeNode,
};

pub mod memory;

pub use memory::{
    InMemoryDocumentStore, InMemoryStoreProvider, InMemoryTreeStore, StoreLimits,
};

/// Backend-reported failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    DataStale,
    Failure,
    PermissionDenied,
    Disconnected,
    MaxRetries,
    OverriddenBySet,
    NetworkError,
    Aborted,
    DeadlineExceeded,
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    Unavailable,
    Unknown,
}

impl StoreErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataStale => "data-stale",
            Self::Failure => "failure",
            Self::PermissionDenied => "permission-denied",
            Self::Disconnected => "disconnected",
            Self::MaxRetries => "max-retries",
            Self::OverriddenBySet => "overridden-by-set",
            Self::NetworkError => "network-error",
            Self::Aborted => "aborted",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NotFound => "not-found",
            Self::InvalidArgument => "invalid-argument",
            Self::FailedPrecondition => "failed-precondition",
            Self::Unavailable => "unavailable",
            Self::Unknown => "unknown",
        }
    }
}

/// Error raised by a backend store, rendered with its service prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}/{}: {message}", .service.service(), .code.as_str())]
pub struct StoreError {
    pub service: StoreKind,
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(service: StoreKind, code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            service,
            code,
            message: message.into(),
        }
    }

    pub fn tree(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(StoreKind::Tree, code, message)
    }

    pub fn document(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self::new(StoreKind::Document, code, message)
    }

    /// Wire code such as `database/max-retries`.
    pub fn wire_code(&self) -> String {
        format!("{}/{}", self.service.service(), self.code.as_str())
    }

    pub(crate) fn poisoned(service: StoreKind) -> Self {
        Self::new(service, StoreErrorCode::Unknown, "poisoned lock")
    }
}

impl From<StoreError> for BridgeError {
    fn from(error: StoreError) -> Self {
        BridgeError::new(BridgeErrorCategory::Store, error.wire_code(), error.message)
    }
}

/// Per-attempt decision returned by a tree-store transaction handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeAttempt {
    /// Try to commit this node at the transaction path.
    Commit(TreeNode),
    /// Stop without writing.
    Abort,
}

/// Final outcome of a tree-store transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeCommit {
    pub committed: bool,
    /// Node stored at the transaction path when the transaction finished.
    pub node: TreeNode,
}

/// Key/value tree store with full-value optimistic transactions.
pub trait TreeStore: Send + Sync {
    /// Run `handler` against the current node at `path`, retrying on
    /// conflicting concurrent writes. The handler is invoked sequentially on
    /// the calling thread, once per attempt.
    fn run_transaction(
        &self,
        path: &str,
        apply_locally: bool,
        handler: &mut dyn FnMut(&TreeNode) -> TreeAttempt,
    ) -> Result<TreeCommit, StoreError>;
}

/// Handle to one document-store transaction attempt.
///
/// Reads may arrive from a different thread than the one running the
/// transaction function, so all methods take `&self`.
pub trait DocumentTransaction: Send + Sync {
    fn get(&self, path: &str) -> Result<DocumentSnapshot, StoreError>;

    fn set(&self, path: &str, data: DocumentData, options: SetOptions) -> Result<(), StoreError>;

    /// Update existing fields; keys may be dotted field paths.
    fn update(&self, path: &str, data: DocumentData) -> Result<(), StoreError>;

    fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// Transaction function driven by [`DocumentStore::run_transaction`].
pub type DocumentTransactionFn<'a> =
    dyn FnMut(Arc<dyn DocumentTransaction>) -> Result<(), StoreError> + 'a;

/// Document store with buffered-operation optimistic transactions.
pub trait DocumentStore: Send + Sync {
    /// Run `function` once per attempt and commit its buffered writes.
    /// An error returned by the function ends the transaction without retry.
    fn run_transaction(&self, function: &mut DocumentTransactionFn<'_>) -> Result<(), StoreError>;
}

/// Resolves backend stores per connection target.
pub trait StoreProvider: Send + Sync {
    fn tree_store(&self, target: &BackendTarget) -> Result<Arc<dyn TreeStore>, StoreError>;

    fn document_store(&self, target: &BackendTarget) -> Result<Arc<dyn DocumentStore>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_maps_to_prefixed_bridge_error() {
        let err = StoreError::tree(StoreErrorCode::MaxRetries, "too many retries");
        assert_eq!(err.to_string(), "database/max-retries: too many retries");

        let bridged = BridgeError::from(err);
        assert_eq!(bridged.category, BridgeErrorCategory::Store);
        assert_eq!(bridged.code, "database/max-retries");

        let err = StoreError::document(StoreErrorCode::Aborted, "contention");
        assert_eq!(err.wire_code(), "firestore/aborted");
    }
}
