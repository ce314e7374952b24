use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use tracing::debug;
use txbridge_core::{StoreKind, TreeNode, tree::path_segments};

use crate::{StoreError, StoreErrorCode, TreeAttempt, TreeCommit, TreeStore};

#[derive(Debug, Default)]
struct TreeState {
    root: TreeNode,
    version: u64,
    /// Optimistic values raised by `apply_locally` attempts, keyed by
    /// normalized path.
    local: HashMap<String, TreeNode>,
}

/// Single-rooted in-memory tree store with compare-on-commit transactions.
///
/// Any committed write bumps one global version, so a transaction conflicts
/// with every write that landed after its read.
#[derive(Debug)]
pub struct InMemoryTreeStore {
    state: Mutex<TreeState>,
    max_retries: u32,
}

impl InMemoryTreeStore {
    pub const DEFAULT_MAX_RETRIES: u32 = 25;

    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(TreeState::default()),
            max_retries: max_retries.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TreeState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::poisoned(StoreKind::Tree))
    }

    /// Write outside any transaction.
    pub fn set(&self, path: &str, node: TreeNode) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.root.set(path, node);
        state.version += 1;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<TreeNode, StoreError> {
        Ok(self.lock()?.root.get(path).clone())
    }

    /// Value as seen by local listeners: the pending `apply_locally` value
    /// when one exists, else the committed node.
    pub fn local_value(&self, path: &str) -> Result<TreeNode, StoreError> {
        let state = self.lock()?;
        let key = normalize(path);
        Ok(state
            .local
            .get(&key)
            .cloned()
            .unwrap_or_else(|| state.root.get(path).clone()))
    }
}

impl Default for InMemoryTreeStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

impl TreeStore for InMemoryTreeStore {
    fn run_transaction(
        &self,
        path: &str,
        apply_locally: bool,
        handler: &mut dyn FnMut(&TreeNode) -> TreeAttempt,
    ) -> Result<TreeCommit, StoreError> {
        let key = normalize(path);

        for attempt in 1..=self.max_retries {
            let (read_version, current) = {
                let state = self.lock()?;
                (state.version, state.root.get(path).clone())
            };

            let node = match handler(&current) {
                TreeAttempt::Abort => {
                    self.lock()?.local.remove(&key);
                    debug!(path = %key, attempt, "tree transaction aborted by handler");
                    return Ok(TreeCommit {
                        committed: false,
                        node: current,
                    });
                }
                TreeAttempt::Commit(node) => node,
            };

            let mut state = self.lock()?;
            if apply_locally {
                state.local.insert(key.clone(), node.clone());
            }
            if state.version == read_version {
                state.root.set(path, node);
                state.version += 1;
                state.local.remove(&key);
                return Ok(TreeCommit {
                    committed: true,
                    node: state.root.get(path).clone(),
                });
            }
            debug!(path = %key, attempt, "tree transaction lost a commit race; retrying");
        }

        self.lock()?.local.remove(&key);
        Err(StoreError::tree(
            StoreErrorCode::MaxRetries,
            "The transaction had too many retries.",
        ))
    }
}

fn normalize(path: &str) -> String {
    path_segments(path).collect::<Vec<_>>().join("/")
}

#[cfg(test)]
mod tests {
    use txbridge_core::NativeLeaf;

    use super::*;

    fn long(value: i64) -> TreeNode {
        TreeNode::leaf(NativeLeaf::Long(value))
    }

    fn increment(node: &TreeNode) -> TreeAttempt {
        match node {
            TreeNode::Leaf(NativeLeaf::Long(value)) => TreeAttempt::Commit(long(value + 1)),
            _ => TreeAttempt::Commit(long(1)),
        }
    }

    #[test]
    fn commits_handler_value() {
        let store = InMemoryTreeStore::default();
        store.set("counter", long(41)).expect("seed should work");

        let commit = store
            .run_transaction("counter", false, &mut increment)
            .expect("transaction should commit");

        assert!(commit.committed);
        assert_eq!(commit.node, long(42));
        assert_eq!(store.get("counter").expect("read"), long(42));
    }

    #[test]
    fn abort_leaves_value_untouched() {
        let store = InMemoryTreeStore::default();
        store.set("counter", long(1)).expect("seed should work");

        let commit = store
            .run_transaction("counter", false, &mut |_| TreeAttempt::Abort)
            .expect("abort is not an error");

        assert!(!commit.committed);
        assert_eq!(commit.node, long(1));
    }

    #[test]
    fn retries_after_conflicting_write() {
        let store = InMemoryTreeStore::default();
        store.set("counter", long(1)).expect("seed should work");
        let mut calls = 0;

        let commit = store
            .run_transaction("counter", false, &mut |node| {
                calls += 1;
                if calls == 1 {
                    store.set("counter", long(10)).expect("concurrent write");
                }
                increment(node)
            })
            .expect("transaction should commit on retry");

        assert_eq!(calls, 2);
        assert_eq!(commit.node, long(11));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let store = InMemoryTreeStore::new(3);
        let mut calls = 0;

        let err = store
            .run_transaction("counter", true, &mut |node| {
                calls += 1;
                store.set("other", long(calls)).expect("concurrent write");
                increment(node)
            })
            .expect_err("every attempt conflicts");

        assert_eq!(calls, 3);
        assert_eq!(err.wire_code(), "database/max-retries");
        assert_eq!(store.local_value("counter").expect("read"), TreeNode::Empty);
    }

    #[test]
    fn apply_locally_exposes_pending_value() {
        let store = InMemoryTreeStore::default();
        let mut seen_local = TreeNode::Empty;
        let mut calls = 0;

        store
            .run_transaction("/counter/", true, &mut |node| {
                calls += 1;
                if calls == 2 {
                    seen_local = store.local_value("counter").expect("read");
                }
                if calls == 1 {
                    store.set("noise", long(1)).expect("concurrent write");
                }
                increment(node)
            })
            .expect("transaction should commit");

        assert_eq!(seen_local, long(1));
        assert_eq!(store.local_value("counter").expect("read"), long(1));
    }
}
