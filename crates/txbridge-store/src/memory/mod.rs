//! Optimistic in-memory backends.

mod document;
mod tree;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::debug;
use txbridge_core::{BackendTarget, RetryPolicy, StoreKind};

pub use document::InMemoryDocumentStore;
pub use tree::InMemoryTreeStore;

use crate::{DocumentStore, StoreError, StoreProvider, TreeStore};

/// Retry caps applied to stores created by [`InMemoryStoreProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub tree_max_retries: u32,
    pub document_retry: RetryPolicy,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            tree_max_retries: InMemoryTreeStore::DEFAULT_MAX_RETRIES,
            document_retry: RetryPolicy::default(),
        }
    }
}

/// Hands out one in-memory store per target, created on first use.
#[derive(Debug, Default)]
pub struct InMemoryStoreProvider {
    limits: StoreLimits,
    trees: Mutex<HashMap<BackendTarget, Arc<InMemoryTreeStore>>>,
    documents: Mutex<HashMap<BackendTarget, Arc<InMemoryDocumentStore>>>,
}

impl InMemoryStoreProvider {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Concrete tree store for `target`, for seeding and inspection.
    pub fn tree(&self, target: &BackendTarget) -> Result<Arc<InMemoryTreeStore>, StoreError> {
        let mut trees = self
            .trees
            .lock()
            .map_err(|_| StoreError::poisoned(StoreKind::Tree))?;
        let store = trees.entry(target.clone()).or_insert_with(|| {
            debug!(app = %target.app_name, "creating in-memory tree store");
            Arc::new(InMemoryTreeStore::new(self.limits.tree_max_retries))
        });
        Ok(Arc::clone(store))
    }

    /// Concrete document store for `target`, for seeding and inspection.
    pub fn documents(
        &self,
        target: &BackendTarget,
    ) -> Result<Arc<InMemoryDocumentStore>, StoreError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| StoreError::poisoned(StoreKind::Document))?;
        let store = documents.entry(target.clone()).or_insert_with(|| {
            debug!(app = %target.app_name, "creating in-memory document store");
            Arc::new(InMemoryDocumentStore::new(self.limits.document_retry))
        });
        Ok(Arc::clone(store))
    }
}

impl StoreProvider for InMemoryStoreProvider {
    fn tree_store(&self, target: &BackendTarget) -> Result<Arc<dyn TreeStore>, StoreError> {
        let store: Arc<dyn TreeStore> = self.tree(target)?;
        Ok(store)
    }

    fn document_store(&self, target: &BackendTarget) -> Result<Arc<dyn DocumentStore>, StoreError> {
        let store: Arc<dyn DocumentStore> = self.documents(target)?;
        Ok(store)
    }
}
