use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    tree::{ChildKey, NativeLeaf, TreeNode, last_segment},
    types::TreeSnapshot,
    value::TaggedValue,
};

/// Encode a tree node into a tagged value.
pub fn encode(node: &TreeNode) -> TaggedValue {
    match node {
        TreeNode::Empty => TaggedValue::Null,
        TreeNode::Leaf(leaf) => encode_leaf(leaf),
        TreeNode::Branch(children) => match list_len(children) {
            Some(len) => encode_list(children, len),
            None => TaggedValue::Map(
                children
                    .iter()
                    .map(|(key, child)| (key.as_str().to_owned(), encode(child)))
                    .collect(),
            ),
        },
    }
}

/// Decode a tagged value into a tree node.
///
/// Lists become branches keyed by index. Null entries are dropped because the
/// tree store cannot hold them, which makes gap-filled lists round-trip.
pub fn decode(value: &TaggedValue) -> TreeNode {
    match value {
        TaggedValue::Null => TreeNode::Empty,
        TaggedValue::Bool(flag) => TreeNode::leaf(NativeLeaf::Bool(*flag)),
        TaggedValue::Integer(number) => TreeNode::leaf(NativeLeaf::Long(*number)),
        TaggedValue::Double(number) => TreeNode::leaf(NativeLeaf::Double(*number)),
        TaggedValue::String(text) => TreeNode::leaf(NativeLeaf::String(text.clone())),
        TaggedValue::List(items) => TreeNode::branch(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), decode(item))),
        ),
        TaggedValue::Map(entries) => {
            TreeNode::branch(entries.iter().map(|(key, item)| (key.as_str(), decode(item))))
        }
        other => {
            warn!(
                kind = other.kind_name(),
                "tree store cannot hold value kind; storing null"
            );
            TreeNode::Empty
        }
    }
}

/// Build the terminal snapshot payload for the node stored at `path`.
pub fn snapshot(path: &str, node: &TreeNode) -> TreeSnapshot {
    TreeSnapshot {
        key: last_segment(path).map(str::to_owned),
        exists: node.exists(),
        has_children: node.has_children(),
        children_count: node.children_count(),
        child_keys: node.child_keys(),
        value: encode(node),
        priority: None,
    }
}

fn encode_leaf(leaf: &NativeLeaf) -> TaggedValue {
    match leaf {
        NativeLeaf::Bool(flag) => TaggedValue::Bool(*flag),
        NativeLeaf::Long(number) => TaggedValue::Integer(*number),
        NativeLeaf::Double(number) => TaggedValue::Double(*number),
        NativeLeaf::String(text) => TaggedValue::String(text.clone()),
        NativeLeaf::Unsupported { type_name } => {
            warn!(type_name = %type_name, "unsupported native leaf type; encoding as null");
            TaggedValue::Null
        }
    }
}

/// Length of the list a branch encodes to, or `None` when it is an object.
///
/// Children are scanned in store order. Every key must be a canonical
/// non-negative integer, the first must be 0, and each must be strictly
/// greater than the previous and below twice the child count.
fn list_len(children: &BTreeMap<ChildKey, TreeNode>) -> Option<usize> {
    let bound = u64::try_from(children.len()).ok()?.saturating_mul(2);
    let mut last: Option<u64> = None;

    for key in children.keys() {
        let index = key.as_index()?;
        let in_order = match last {
            None => index == 0,
            Some(previous) => index > previous,
        };
        if !in_order || index >= bound {
            return None;
        }
        last = Some(index);
    }

    last.and_then(|index| usize::try_from(index).ok()).map(|index| index + 1)
}

fn encode_list(children: &BTreeMap<ChildKey, TreeNode>, len: usize) -> TaggedValue {
    let mut items = vec![TaggedValue::Null; len];
    for (key, child) in children {
        if let Some(slot) = key
            .as_index()
            .and_then(|index| usize::try_from(index).ok())
            .and_then(|index| items.get_mut(index))
        {
            *slot = encode(child);
        }
    }
    TaggedValue::List(items)
}
