//! Native value model of the key/value tree store.
//!
//! The tree store has no list type: every interior node is a set of keyed
//! children and every leaf holds one scalar. Children iterate in the store's
//! key order (canonical integer keys ascending, then string keys
//! lexicographically), which is the order the list heuristic scans.

use std::{cmp::Ordering, collections::BTreeMap};

static EMPTY: TreeNode = TreeNode::Empty;

/// Child key with the tree store's ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildKey(String);

impl ChildKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Integer value when the key is written in canonical form (`"0"`,
    /// `"17"`, `"-3"`; never `"007"` or `"+1"`).
    pub fn as_integer(&self) -> Option<i64> {
        let value = self.0.parse::<i64>().ok()?;
        (value.to_string() == self.0).then_some(value)
    }

    /// Non-negative canonical integer value, usable as a list index.
    pub fn as_index(&self) -> Option<u64> {
        self.as_integer().and_then(|value| u64::try_from(value).ok())
    }
}

impl Ord for ChildKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_integer(), other.as_integer()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ChildKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for ChildKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChildKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scalar held by a childless node, keyed by its native runtime type.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeLeaf {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    /// A value whose native type the codec does not understand.
    Unsupported { type_name: String },
}

/// One node of the tree store.
///
/// `Branch` never holds an empty map; [`TreeNode::branch`] collapses it to
/// `Empty` and drops empty children.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TreeNode {
    #[default]
    Empty,
    Leaf(NativeLeaf),
    Branch(BTreeMap<ChildKey, TreeNode>),
}

impl TreeNode {
    pub fn leaf(leaf: NativeLeaf) -> Self {
        Self::Leaf(leaf)
    }

    /// Build an interior node, discarding empty children.
    pub fn branch<I, K>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, TreeNode)>,
        K: Into<ChildKey>,
    {
        let children: BTreeMap<ChildKey, TreeNode> = children
            .into_iter()
            .filter(|(_, child)| child.exists())
            .map(|(key, child)| (key.into(), child))
            .collect();

        if children.is_empty() {
            Self::Empty
        } else {
            Self::Branch(children)
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    pub fn has_children(&self) -> bool {
        matches!(self, Self::Branch(children) if !children.is_empty())
    }

    pub fn children_count(&self) -> usize {
        match self {
            Self::Branch(children) => children.len(),
            _ => 0,
        }
    }

    /// Children in store iteration order; empty for leaves.
    pub fn children(&self) -> impl Iterator<Item = (&ChildKey, &TreeNode)> {
        match self {
            Self::Branch(children) => Some(children.iter()),
            _ => None,
        }
        .into_iter()
        .flatten()
    }

    pub fn child_keys(&self) -> Vec<String> {
        self.children()
            .map(|(key, _)| key.as_str().to_owned())
            .collect()
    }

    /// Node at a slash-separated path relative to this node.
    pub fn get(&self, path: &str) -> &TreeNode {
        let mut node = self;
        for segment in path_segments(path) {
            node = match node {
                Self::Branch(children) => match children.get(&ChildKey::from(segment)) {
                    Some(child) => child,
                    None => return &EMPTY,
                },
                _ => return &EMPTY,
            };
        }
        node
    }

    /// Replace the node at `path`, creating or pruning interior nodes.
    pub fn set(&mut self, path: &str, node: TreeNode) {
        let segments: Vec<&str> = path_segments(path).collect();
        self.set_segments(&segments, node);
    }

    fn set_segments(&mut self, segments: &[&str], node: TreeNode) {
        let Some((head, rest)) = segments.split_first() else {
            *self = node;
            return;
        };

        let mut children = match std::mem::take(self) {
            Self::Branch(children) => children,
            _ => BTreeMap::new(),
        };
        let key = ChildKey::from(*head);
        let mut child = children.remove(&key).unwrap_or_default();
        child.set_segments(rest, node);
        if child.exists() {
            children.insert(key, child);
        }

        *self = if children.is_empty() {
            Self::Empty
        } else {
            Self::Branch(children)
        };
    }
}

impl From<NativeLeaf> for TreeNode {
    fn from(leaf: NativeLeaf) -> Self {
        Self::Leaf(leaf)
    }
}

/// Non-empty segments of a slash-separated path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Last segment of a path, `None` for the root.
pub fn last_segment(path: &str) -> Option<&str> {
    path_segments(path).last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(value: i64) -> TreeNode {
        TreeNode::leaf(NativeLeaf::Long(value))
    }

    #[test]
    fn orders_integer_keys_numerically_before_strings() {
        let node = TreeNode::branch([
            ("b", long(1)),
            ("10", long(2)),
            ("2", long(3)),
            ("a", long(4)),
        ]);
        assert_eq!(node.child_keys(), vec!["2", "10", "a", "b"]);
    }

    #[test]
    fn non_canonical_integers_sort_as_strings() {
        assert_eq!(ChildKey::new("007").as_integer(), None);
        assert_eq!(ChildKey::new("+1").as_integer(), None);
        assert_eq!(ChildKey::new("-3").as_integer(), Some(-3));
        assert_eq!(ChildKey::new("-3").as_index(), None);
        assert!(ChildKey::new("9") < ChildKey::new("007"));
    }

    #[test]
    fn set_and_get_follow_paths() {
        let mut root = TreeNode::Empty;
        root.set("users/alice/age", long(30));
        root.set("users/bob", long(1));

        assert_eq!(root.get("users/alice/age"), &long(30));
        assert_eq!(root.get("/users//bob/"), &long(1));
        assert_eq!(root.get("users/carol"), &TreeNode::Empty);
        assert_eq!(root.get("users").children_count(), 2);
    }

    #[test]
    fn setting_empty_prunes_parents() {
        let mut root = TreeNode::Empty;
        root.set("a/b/c", long(1));
        root.set("a/b/c", TreeNode::Empty);
        assert_eq!(root, TreeNode::Empty);
    }

    #[test]
    fn branch_drops_empty_children() {
        let node = TreeNode::branch([("a", TreeNode::Empty)]);
        assert!(!node.exists());
        assert_eq!(last_segment("users/alice"), Some("alice"));
        assert_eq!(last_segment("/"), None);
    }
}
