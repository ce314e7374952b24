use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    codec::typemap,
    error::BridgeError,
    value::{DocumentData, TaggedValue},
};

/// Wire form of a typemap-encoded field map.
pub type WireMap = Map<String, Value>;

/// Which backend a transaction runs against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Key/value tree store with full-value transactions.
    Tree,
    /// Document store with buffered-operation transactions.
    Document,
}

impl StoreKind {
    /// Service prefix used in error codes.
    pub fn service(self) -> &'static str {
        match self {
            Self::Tree => "database",
            Self::Document => "firestore",
        }
    }
}

/// Selects one backend connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    /// Application name, `[DEFAULT]` for the default app.
    pub app_name: String,
    /// Optional database selector (URL or database id).
    pub database: Option<String>,
}

impl BackendTarget {
    pub const DEFAULT_APP: &'static str = "[DEFAULT]";

    pub fn new(app_name: impl Into<String>, database: Option<String>) -> Self {
        Self {
            app_name: app_name.into(),
            database,
        }
    }
}

impl Default for BackendTarget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_APP, None)
    }
}

/// Options for `SET` commands.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge into the existing document instead of replacing it.
    #[serde(default)]
    pub merge: bool,
}

/// Kind of a buffered document-store write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionCommandKind {
    Set,
    Update,
    Delete,
}

/// One write accumulated by the caller while a document transaction is paused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionCommand {
    #[serde(rename = "type")]
    pub kind: TransactionCommandKind,
    /// Document path, for example `users/alice`.
    pub path: String,
    /// Typemap-encoded fields for `SET`/`UPDATE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WireMap>,
    #[serde(default)]
    pub options: SetOptions,
}

impl TransactionCommand {
    pub fn set(path: impl Into<String>, data: &DocumentData, options: SetOptions) -> Self {
        Self {
            kind: TransactionCommandKind::Set,
            path: path.into(),
            data: Some(typemap::encode_map(data)),
            options,
        }
    }

    pub fn update(path: impl Into<String>, data: &DocumentData) -> Self {
        Self {
            kind: TransactionCommandKind::Update,
            path: path.into(),
            data: Some(typemap::encode_map(data)),
            options: SetOptions::default(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: TransactionCommandKind::Delete,
            path: path.into(),
            data: None,
            options: SetOptions::default(),
        }
    }

    /// Decoded field data; empty when none was sent.
    pub fn decoded_data(&self) -> DocumentData {
        self.data
            .as_ref()
            .map(typemap::decode_map)
            .unwrap_or_default()
    }
}

/// Tree-store snapshot sent with a terminal `complete` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeSnapshot {
    /// Last path segment, `None` at the root.
    pub key: Option<String>,
    pub exists: bool,
    pub has_children: bool,
    pub children_count: usize,
    /// Child keys in store order.
    pub child_keys: Vec<String>,
    pub value: TaggedValue,
    /// Node priority. The in-memory tree store keeps none, so this is
    /// always `None` there.
    #[serde(default)]
    pub priority: Option<TaggedValue>,
}

/// Document snapshot returned by a read inside a paused transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSnapshotPayload {
    pub path: String,
    pub exists: bool,
    /// `[from_cache, has_pending_writes]`.
    pub metadata: [bool; 2],
    /// Typemap-encoded fields when the document exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WireMap>,
}

/// Command channel input accepted by the bridge runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeCommand {
    /// Start a full-value transaction on the tree store.
    BeginTreeTransaction {
        session_id: String,
        target: BackendTarget,
        /// Slash-separated path of the transacted node.
        path: String,
        /// Raise local change events for intermediate attempts.
        #[serde(default)]
        apply_locally: bool,
    },
    /// Caller verdict for the currently paused tree attempt.
    SubmitTreeVerdict {
        session_id: String,
        value: TaggedValue,
        abort: bool,
    },
    /// Start a buffered-operation transaction on the document store.
    BeginDocumentTransaction {
        session_id: String,
        target: BackendTarget,
    },
    /// Caller operation buffer for the currently paused document attempt.
    ApplyDocumentBuffer {
        session_id: String,
        commands: Vec<TransactionCommand>,
    },
    /// Read a document through the paused document transaction.
    GetDocument { session_id: String, path: String },
    /// Abort and forget a session, for example on caller teardown.
    DisposeTransaction { store: StoreKind, session_id: String },
}

impl BridgeCommand {
    pub fn session_id(&self) -> &str {
        match self {
            Self::BeginTreeTransaction { session_id, .. }
            | Self::SubmitTreeVerdict { session_id, .. }
            | Self::BeginDocumentTransaction { session_id, .. }
            | Self::ApplyDocumentBuffer { session_id, .. }
            | Self::GetDocument { session_id, .. }
            | Self::DisposeTransaction { session_id, .. } => session_id,
        }
    }

    /// Short name used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BeginTreeTransaction { .. } => "begin_tree_transaction",
            Self::SubmitTreeVerdict { .. } => "submit_tree_verdict",
            Self::BeginDocumentTransaction { .. } => "begin_document_transaction",
            Self::ApplyDocumentBuffer { .. } => "apply_document_buffer",
            Self::GetDocument { .. } => "get_document",
            Self::DisposeTransaction { .. } => "dispose_transaction",
        }
    }
}

/// Successful result of a call-with-result command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeReply {
    /// The command was accepted; results follow as events.
    Accepted,
    /// Result of `GetDocument`.
    Document(DocumentSnapshotPayload),
}

/// Error body of a terminal `error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<BridgeError> for TransactionErrorPayload {
    fn from(error: BridgeError) -> Self {
        Self {
            code: error.code,
            message: error.message,
        }
    }
}

/// Payload of a transaction event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEventKind {
    /// An attempt is paused waiting for the caller. Tree sessions carry the
    /// current value; document sessions only signal readiness.
    Update { value: Option<TaggedValue> },
    /// The backend finished without error.
    Complete {
        committed: bool,
        snapshot: Option<TreeSnapshot>,
    },
    /// The backend failed, or the coordinator timed out or was interrupted.
    Error {
        error: TransactionErrorPayload,
        committed: bool,
        timeout: bool,
        interrupted: bool,
    },
}

impl TransactionEventKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Update { .. })
    }
}

/// Event scoped to one transaction session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionEvent {
    pub session_id: String,
    pub store: StoreKind,
    pub target: BackendTarget,
    #[serde(flatten)]
    pub kind: TransactionEventKind,
}

/// Event channel output emitted by the runtime and coordinators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BridgeEvent {
    /// Per-session update or terminal result.
    Transaction(TransactionEvent),
    /// A fire-and-forget command failed.
    CommandFailed {
        session_id: Option<String>,
        code: String,
        message: String,
    },
}
