//! Core transaction-bridge contract shared between the runtime and callers.
//!
//! This crate defines the command/event protocol, the tagged value model,
//! the tree-store and document-store codecs, the verdict handshake, the
//! per-session state machine, and the common error/channel abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Tree-store and document-store value codecs.
pub mod codec;
/// Native document-store snapshot model.
pub mod document;
/// Stable bridge error types.
pub mod error;
/// Bounded verdict rendezvous between worker and caller.
pub mod handshake;
/// Terminal-result and command-failure normalization.
pub mod normalization;
/// Backoff policy used by optimistic retry loops.
pub mod retry;
/// Per-session coordinator state machine.
pub mod state_machine;
/// Native tree-store node model.
pub mod tree;
/// Caller-facing protocol types (commands, events, payloads).
pub mod types;
/// Transport-neutral tagged value.
pub mod value;

pub use channel::{BridgeChannelError, BridgeChannels, CommandEnvelope, EventStream, ReplySender};
pub use document::DocumentSnapshot;
pub use error::{BridgeError, BridgeErrorCategory, INTERNAL_ERROR_CODE};
pub use handshake::{Handshake, HandshakeTiming, SignalOutcome, WaitOutcome};
pub use normalization::{
    AttemptFlags, TreeCompletion, command_failed, document_terminal, transaction_event,
    tree_terminal,
};
pub use retry::RetryPolicy;
pub use state_machine::{SessionState, SessionStateMachine};
pub use tree::{ChildKey, NativeLeaf, TreeNode};
pub use types::{
    BackendTarget, BridgeCommand, BridgeEvent, BridgeReply, DocumentSnapshotPayload, SetOptions,
    StoreKind, TransactionCommand, TransactionCommandKind, TransactionErrorPayload,
    TransactionEvent, TransactionEventKind, TreeSnapshot, WireMap,
};
pub use value::{DocumentData, FieldOperation, GeoPoint, TaggedValue, Timestamp};
