//! The live, mutable state tree.
//!
//! Raw reads return unresolved values, including derived-value leaves;
//! resolution belongs to the read side (`view`). Every successful write is
//! exactly one logical change; the store commits it as exactly one mutation
//! notification.

use serde_json::Value;

use crate::store::error::StoreError;
use crate::store::node::StateNode;
use crate::store::path::{KeyPath, Segment};
use crate::store::view::StateView;

/// Deeply-mutable container for the store's state.
#[derive(Debug)]
pub struct StateTree {
    root: StateNode,
}

impl StateTree {
    /// Wrap an initial state definition. The root is expected to be a map.
    pub fn new(root: StateNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &StateNode {
        &self.root
    }

    /// Raw read: the live, unresolved node at `path`. Missing paths are
    /// `None`; no sentinel value is introduced.
    pub fn get(&self, path: &KeyPath) -> Option<&StateNode> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = match (node, segment) {
                (StateNode::Map(map), Segment::Key(key)) => map.get(key)?,
                (StateNode::Array(items), Segment::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Replace the node at `path`. The final segment may create a new map
    /// key (assignment semantics); intermediate containers must already
    /// exist. Array writes must be in bounds, except writing one past the
    /// end, which appends.
    pub fn set(&mut self, path: &KeyPath, value: StateNode) -> Result<(), StoreError> {
        let invalid = |reason| StoreError::InvalidPath {
            path: path.clone(),
            reason,
        };

        let (last, parents) = path
            .segments()
            .split_last()
            .ok_or_else(|| invalid("cannot replace the root"))?;

        let mut node = &mut self.root;
        for segment in parents {
            node = match (node, segment) {
                (StateNode::Map(map), Segment::Key(key)) => map
                    .get_mut(key)
                    .ok_or_else(|| invalid("missing intermediate container"))?,
                (StateNode::Array(items), Segment::Index(index)) => items
                    .get_mut(*index)
                    .ok_or_else(|| invalid("array index out of bounds"))?,
                (StateNode::Derived(_), _) => {
                    return Err(invalid("cannot write through a derived value"))
                }
                _ => return Err(invalid("missing intermediate container")),
            };
        }

        match (node, last) {
            (StateNode::Map(map), Segment::Key(key)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (StateNode::Array(items), Segment::Index(index)) => {
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else if *index == items.len() {
                    items.push(value);
                    Ok(())
                } else {
                    Err(invalid("array index out of bounds"))
                }
            }
            _ => Err(invalid("parent container cannot hold this segment")),
        }
    }

    /// Append to the array at `path`, the length-changing array mutation.
    pub fn push(&mut self, path: &KeyPath, value: StateNode) -> Result<(), StoreError> {
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = match (node, segment) {
                (StateNode::Map(map), Segment::Key(key)) => {
                    map.get_mut(key).ok_or_else(|| StoreError::InvalidPath {
                        path: path.clone(),
                        reason: "missing intermediate container",
                    })?
                }
                (StateNode::Array(items), Segment::Index(index)) => {
                    items.get_mut(*index).ok_or_else(|| StoreError::InvalidPath {
                        path: path.clone(),
                        reason: "array index out of bounds",
                    })?
                }
                _ => {
                    return Err(StoreError::InvalidPath {
                        path: path.clone(),
                        reason: "missing intermediate container",
                    })
                }
            };
        }
        match node {
            StateNode::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(StoreError::InvalidPath {
                path: path.clone(),
                reason: "not an array",
            }),
        }
    }

    /// Top-level key assignment used by devtools replay. The incoming value
    /// is plain JSON from the inspector; existing derived leaves are kept
    /// (functions never cross the wire, so the inspector cannot restore
    /// them) and unknown keys are inserted.
    pub fn assign_replay(&mut self, key: &str, incoming: &Value) {
        let StateNode::Map(root) = &mut self.root else {
            return;
        };
        let next = match root.get(key) {
            Some(existing) => merged(existing, incoming),
            None => StateNode::from(incoming.clone()),
        };
        root.insert(key.to_string(), next);
    }
}

/// Assignment that preserves derived leaves wherever the existing subtree
/// still holds them; everything else takes the inspector's value.
fn merged(existing: &StateNode, incoming: &Value) -> StateNode {
    match (existing, incoming) {
        (StateNode::Derived(_), _) => existing.clone(),
        (StateNode::Map(map), Value::Object(obj)) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, value) in obj {
                let next = match map.get(key) {
                    Some(child) => merged(child, value),
                    None => StateNode::from(value.clone()),
                };
                out.insert(key.clone(), next);
            }
            // keys the inspector no longer carries survive only as derived
            // definitions, which have no wire representation
            for (key, child) in map {
                if !obj.contains_key(key) && child.contains_derived() {
                    out.insert(key.clone(), child.clone());
                }
            }
            StateNode::Map(out)
        }
        (StateNode::Array(items), Value::Array(incoming_items)) => StateNode::Array(
            incoming_items
                .iter()
                .enumerate()
                .map(|(index, value)| match items.get(index) {
                    Some(child) => merged(child, value),
                    None => StateNode::from(value.clone()),
                })
                .collect(),
        ),
        _ => StateNode::from(incoming.clone()),
    }
}

impl StateTree {
    /// True when the node at `path` is a derived leaf.
    pub fn is_derived(&self, path: &KeyPath) -> bool {
        matches!(self.get(path), Some(StateNode::Derived(_)))
    }
}

impl StateView for StateTree {
    fn node(&self, path: &KeyPath) -> Option<StateNode> {
        self.get(path).cloned()
    }
}
