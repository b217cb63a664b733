//! Immutable, structurally-shared snapshots of the state tree.
//!
//! A snapshot is a fully-resolved copy: computed leaves are evaluated,
//! parameterized leaves are dropped (they have no data form). Subtrees that
//! hold only plain data and were not touched since the previous snapshot are
//! shared with it, so `ptr_eq` on a subtree (or on the whole root when
//! nothing changed) approximates "nothing relevant changed" without a deep
//! comparison. Derived-bearing subtrees are rebuilt every time: their values
//! may depend on state anywhere in the tree.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::store::node::{Derived, StateNode};
use crate::store::path::{KeyPath, Segment};
use crate::store::tree::StateTree;
use crate::store::view::{Resolver, StateView};

/// One node of a frozen snapshot.
#[derive(Debug, PartialEq)]
pub enum SnapNode {
    /// Null, bool, number, or string; never an object or array.
    Leaf(Value),
    Array(Vec<Arc<SnapNode>>),
    Map(BTreeMap<String, Arc<SnapNode>>),
}

/// An immutable point-in-time copy of the state tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    root: Arc<SnapNode>,
}

impl Snapshot {
    /// Cheap identity comparison enabled by structural sharing.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// The shared subtree at `path`, for identity comparison across
    /// snapshots.
    pub fn subtree(&self, path: impl Into<KeyPath>) -> Option<Arc<SnapNode>> {
        let path = path.into();
        let mut node = &self.root;
        for segment in path.segments() {
            node = match (&**node, segment) {
                (SnapNode::Map(map), Segment::Key(key)) => map.get(key)?,
                (SnapNode::Array(items), Segment::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(Arc::clone(node))
    }

    /// Plain-data read out of the frozen copy.
    pub fn get(&self, path: impl Into<KeyPath>) -> Option<Value> {
        self.subtree(path).map(|node| snap_to_value(&node))
    }

    /// The whole snapshot as plain JSON, for the devtools wire.
    pub fn to_value(&self) -> Value {
        snap_to_value(&self.root)
    }
}

/// Snapshots also serve as a frozen [`StateView`] target: resolution over
/// them is trivially raw, since nothing derived survives the freeze.
impl StateView for Snapshot {
    fn node(&self, path: &KeyPath) -> Option<StateNode> {
        self.subtree(path.clone()).map(|node| snap_to_state(&node))
    }
}

fn snap_to_value(node: &SnapNode) -> Value {
    match node {
        SnapNode::Leaf(value) => value.clone(),
        SnapNode::Array(items) => Value::Array(items.iter().map(|i| snap_to_value(i)).collect()),
        SnapNode::Map(map) => Value::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), snap_to_value(child)))
                .collect(),
        ),
    }
}

fn snap_to_state(node: &SnapNode) -> StateNode {
    StateNode::from(snap_to_value(node))
}

fn value_to_snap(value: Value) -> SnapNode {
    match value {
        Value::Array(items) => SnapNode::Array(
            items
                .into_iter()
                .map(|item| Arc::new(value_to_snap(item)))
                .collect(),
        ),
        Value::Object(map) => SnapNode::Map(
            map.into_iter()
                .map(|(key, child)| (key, Arc::new(value_to_snap(child))))
                .collect(),
        ),
        leaf => SnapNode::Leaf(leaf),
    }
}

/// Builds a snapshot of a live tree, reusing unchanged plain subtrees from
/// the previous one.
pub(crate) struct SnapshotBuilder<'a> {
    resolver: Resolver<'a>,
    dirty: &'a [KeyPath],
}

impl<'a> SnapshotBuilder<'a> {
    pub(crate) fn build(
        tree: &'a StateTree,
        prev: Option<&Snapshot>,
        dirty: &'a [KeyPath],
    ) -> Snapshot {
        let builder = SnapshotBuilder {
            resolver: Resolver::new(tree),
            dirty,
        };
        let prev_root = prev.map(|snapshot| Arc::clone(&snapshot.root));
        Snapshot {
            root: builder.build_node(tree.root(), &KeyPath::root(), prev_root.as_ref()),
        }
    }

    fn build_node(
        &self,
        node: &StateNode,
        path: &KeyPath,
        prev: Option<&Arc<SnapNode>>,
    ) -> Arc<SnapNode> {
        if let Some(prev) = prev {
            if self.clean(path) && !node.contains_derived() {
                return Arc::clone(prev);
            }
        }
        match node {
            StateNode::Null => Arc::new(SnapNode::Leaf(Value::Null)),
            StateNode::Bool(b) => Arc::new(SnapNode::Leaf(Value::Bool(*b))),
            StateNode::Number(n) => Arc::new(SnapNode::Leaf(Value::Number(n.clone()))),
            StateNode::String(s) => Arc::new(SnapNode::Leaf(Value::String(s.clone()))),
            StateNode::Map(map) => {
                let mut out = BTreeMap::new();
                for (key, child) in map {
                    match child {
                        StateNode::Derived(Derived::Parameterized(_)) => continue,
                        StateNode::Derived(Derived::Computed(f)) => {
                            let value = f(&self.resolver.reader());
                            out.insert(key.clone(), Arc::new(value_to_snap(value)));
                        }
                        other => {
                            let child_path = path.child(Segment::Key(key.clone()));
                            let child_prev = prev.and_then(|p| match &**p {
                                SnapNode::Map(m) => m.get(key),
                                _ => None,
                            });
                            out.insert(
                                key.clone(),
                                self.build_node(other, &child_path, child_prev),
                            );
                        }
                    }
                }
                Arc::new(SnapNode::Map(out))
            }
            StateNode::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match item {
                        // functions are never invoked as array elements
                        StateNode::Derived(_) => out.push(Arc::new(SnapNode::Leaf(Value::Null))),
                        other => {
                            let child_path = path.child(Segment::Index(index));
                            let child_prev = prev.and_then(|p| match &**p {
                                SnapNode::Array(a) => a.get(index),
                                _ => None,
                            });
                            out.push(self.build_node(other, &child_path, child_prev));
                        }
                    }
                }
                Arc::new(SnapNode::Array(out))
            }
            StateNode::Derived(Derived::Computed(f)) => {
                Arc::new(value_to_snap(f(&self.resolver.reader())))
            }
            StateNode::Derived(Derived::Parameterized(_)) => Arc::new(SnapNode::Leaf(Value::Null)),
        }
    }

    fn clean(&self, path: &KeyPath) -> bool {
        !self.dirty.iter().any(|dirty| dirty.overlaps(path))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn tree() -> StateTree {
        StateTree::new(StateNode::map([
            ("users", StateNode::from(json!([{ "name": "Ann" }]))),
            ("settings", StateNode::from(json!({ "theme": "dark" }))),
            (
                "number_of_users",
                StateNode::computed(|state| {
                    json!(state
                        .get("users")
                        .and_then(|v| v.as_array().map(Vec::len))
                        .unwrap_or(0))
                }),
            ),
        ]))
    }

    #[test]
    fn test_snapshot_resolves_derived() {
        let tree = tree();
        let snapshot = SnapshotBuilder::build(&tree, None, &[]);
        assert_eq!(
            snapshot.to_value(),
            json!({
                "users": [{ "name": "Ann" }],
                "settings": { "theme": "dark" },
                "number_of_users": 1
            })
        );
        assert_eq!(snapshot.get("users.0.name"), Some(json!("Ann")));
    }

    #[test]
    fn test_untouched_subtrees_are_shared() {
        let mut tree = tree();
        let first = SnapshotBuilder::build(&tree, None, &[]);

        tree.push(&KeyPath::parse("users"), StateNode::from(json!({ "name": "Bo" })))
            .unwrap();
        let second =
            SnapshotBuilder::build(&tree, Some(&first), &[KeyPath::parse("users")]);

        // the mutated subtree (and the recomputed derived leaf) are fresh
        assert!(!second.ptr_eq(&first));
        assert_eq!(second.get("number_of_users"), Some(json!(2)));

        // the untouched plain subtree is the same allocation
        let settings_first = first.subtree("settings").unwrap();
        let settings_second = second.subtree("settings").unwrap();
        assert!(Arc::ptr_eq(&settings_first, &settings_second));

        // both snapshots are still plain deep-equal where unchanged
        assert_eq!(first.get("settings"), second.get("settings"));
    }

    #[test]
    fn test_snapshot_is_a_frozen_view() {
        let tree = tree();
        let snapshot = SnapshotBuilder::build(&tree, None, &[]);
        let resolver = Resolver::new(&snapshot);
        // already resolved at freeze time
        assert_eq!(
            resolver.value(&KeyPath::parse("number_of_users")),
            Some(json!(1))
        );
    }
}
