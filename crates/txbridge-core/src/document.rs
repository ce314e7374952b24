use serde::{Deserialize, Serialize};

use crate::value::{DocumentData, TaggedValue};

/// Native document-store read result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Document path, for example `users/alice`.
    pub path: String,
    /// Field data; `None` when the document does not exist.
    pub data: Option<DocumentData>,
    pub from_cache: bool,
    pub has_pending_writes: bool,
}

impl DocumentSnapshot {
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn found(path: impl Into<String>, data: DocumentData) -> Self {
        Self {
            path: path.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Top-level field value.
    pub fn get(&self, field: &str) -> Option<&TaggedValue> {
        self.data.as_ref().and_then(|data| data.get(field))
    }
}
