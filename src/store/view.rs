//! Read-side resolution of derived values.
//!
//! [`StateView`] is the explicit read interface over a state tree, live or
//! frozen. [`Resolver`] decorates any view with the resolution contract:
//! computed leaves evaluate against current state on every traversal,
//! parameterized leaves come back unevaluated for the consumer to call with
//! explicit arguments. Nothing is cached: derived functions are pure by
//! contract, and every read recomputes.

use serde_json::Value;

use crate::store::node::{Derived, ParameterizedFn, StateNode};
use crate::store::path::{KeyPath, Segment};

/// Raw read access to a state tree.
pub trait StateView {
    /// Unresolved node at `path`; `None` when the path is missing.
    fn node(&self, path: &KeyPath) -> Option<StateNode>;
}

/// Outcome of a resolved read.
pub enum Resolved {
    /// Plain data, with any computed leaves evaluated along the way.
    Value(Value),
    /// A parameterized derived value, returned unevaluated. Supply explicit
    /// arguments through [`Resolver::call`].
    Callable(ParameterizedFn),
}

/// Decorator over a [`StateView`] that evaluates derived leaves on read.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    view: &'a dyn StateView,
}

impl<'a> Resolver<'a> {
    pub fn new(view: &'a dyn StateView) -> Self {
        Self { view }
    }

    /// The read context handed to derived-value functions; it resolves
    /// against the same target tree.
    pub fn reader(&self) -> StateReader<'a> {
        StateReader { view: self.view }
    }

    /// Resolve the node at `path`.
    pub fn resolve(&self, path: &KeyPath) -> Option<Resolved> {
        if let Some(node) = self.view.node(path) {
            // Functions are only recognized as map values. An element of an
            // array stays opaque and has no data form.
            if matches!(node, StateNode::Derived(_))
                && matches!(path.segments().last(), Some(Segment::Index(_)))
            {
                return Some(Resolved::Value(Value::Null));
            }
            return Some(self.finalize(node));
        }

        // A computed leaf on the way down hides the rest of the path from
        // raw traversal; evaluate it and index into its result.
        let segments = path.segments();
        for cut in (0..segments.len()).rev() {
            let prefix = KeyPath::from_segments(&segments[..cut]);
            if let Some(node) = self.view.node(&prefix) {
                return match node {
                    StateNode::Derived(Derived::Computed(f)) => {
                        let value = f(&self.reader());
                        lookup(&value, &segments[cut..]).map(Resolved::Value)
                    }
                    _ => None, // the path is genuinely missing
                };
            }
        }
        None
    }

    /// Resolve to plain data; parameterized derived values resolve to `None`.
    pub fn value(&self, path: &KeyPath) -> Option<Value> {
        match self.resolve(path)? {
            Resolved::Value(value) => Some(value),
            Resolved::Callable(_) => None,
        }
    }

    /// Evaluate the parameterized derived value at `path` with explicit
    /// arguments.
    pub fn call(&self, path: &KeyPath, args: &[Value]) -> Option<Value> {
        match self.resolve(path)? {
            Resolved::Callable(f) => Some(f(&self.reader(), args)),
            Resolved::Value(_) => None,
        }
    }

    fn finalize(&self, node: StateNode) -> Resolved {
        match node {
            StateNode::Derived(Derived::Computed(f)) => Resolved::Value(f(&self.reader())),
            StateNode::Derived(Derived::Parameterized(f)) => Resolved::Callable(f),
            other => Resolved::Value(self.materialize(&other)),
        }
    }

    /// Deep plain-data copy. Computed leaves evaluate; parameterized leaves
    /// are omitted from maps and become null in arrays; they have no data
    /// representation.
    fn materialize(&self, node: &StateNode) -> Value {
        match node {
            StateNode::Null => Value::Null,
            StateNode::Bool(b) => Value::Bool(*b),
            StateNode::Number(n) => Value::Number(n.clone()),
            StateNode::String(s) => Value::String(s.clone()),
            StateNode::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        StateNode::Derived(_) => Value::Null,
                        other => self.materialize(other),
                    })
                    .collect(),
            ),
            StateNode::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (key, child) in map {
                    match child {
                        StateNode::Derived(Derived::Parameterized(_)) => continue,
                        StateNode::Derived(Derived::Computed(f)) => {
                            obj.insert(key.clone(), f(&self.reader()));
                        }
                        other => {
                            obj.insert(key.clone(), self.materialize(other));
                        }
                    }
                }
                Value::Object(obj)
            }
            StateNode::Derived(Derived::Computed(f)) => f(&self.reader()),
            StateNode::Derived(Derived::Parameterized(_)) => Value::Null,
        }
    }
}

/// The resolver is itself a [`StateView`]: reads come back with computed
/// leaves evaluated and parameterized leaves still unevaluated.
impl StateView for Resolver<'_> {
    fn node(&self, path: &KeyPath) -> Option<StateNode> {
        match self.resolve(path)? {
            Resolved::Value(value) => Some(StateNode::from(value)),
            Resolved::Callable(f) => Some(StateNode::Derived(Derived::Parameterized(f))),
        }
    }
}

/// Read context injected into derived-value functions.
#[derive(Clone, Copy)]
pub struct StateReader<'a> {
    view: &'a dyn StateView,
}

impl StateReader<'_> {
    /// Resolved read; `None` when the path is missing or parameterized.
    pub fn get(&self, path: impl Into<KeyPath>) -> Option<Value> {
        Resolver::new(self.view).value(&path.into())
    }

    /// Evaluate a parameterized derived value at `path`.
    pub fn call(&self, path: impl Into<KeyPath>, args: &[Value]) -> Option<Value> {
        Resolver::new(self.view).call(&path.into(), args)
    }
}

/// Index plain data with the remaining path segments.
fn lookup(value: &Value, segments: &[Segment]) -> Option<Value> {
    let mut cursor = value;
    for segment in segments {
        cursor = match (cursor, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key)?,
            (Value::Array(items), Segment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(cursor.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::tree::StateTree;

    fn tree() -> StateTree {
        StateTree::new(StateNode::map([
            ("users", StateNode::from(json!([{ "name": "Ann" }]))),
            (
                "number_of_users",
                StateNode::computed(|state| {
                    let users = state.get("users").unwrap_or(Value::Null);
                    json!(users.as_array().map_or(0, Vec::len))
                }),
            ),
            (
                "greeting",
                StateNode::parameterized(|state, args| {
                    let name = args
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or("stranger")
                        .to_string();
                    let count = state.get("number_of_users").unwrap_or(json!(0));
                    json!(format!("hi {} ({} users)", name, count))
                }),
            ),
        ]))
    }

    #[test]
    fn test_plain_reads_pass_through() {
        let tree = tree();
        let resolver = Resolver::new(&tree);
        assert_eq!(
            resolver.value(&KeyPath::parse("users.0.name")),
            Some(json!("Ann"))
        );
        assert_eq!(resolver.value(&KeyPath::parse("missing")), None);
    }

    #[test]
    fn test_computed_resolves_every_read() {
        let mut tree = tree();
        let path = KeyPath::parse("number_of_users");

        assert_eq!(Resolver::new(&tree).value(&path), Some(json!(1)));

        tree.push(&KeyPath::parse("users"), StateNode::from(json!({ "name": "Bo" })))
            .unwrap();
        // no caching: the next read sees the mutation
        assert_eq!(Resolver::new(&tree).value(&path), Some(json!(2)));
    }

    #[test]
    fn test_computed_idempotent_without_mutation() {
        let tree = tree();
        let resolver = Resolver::new(&tree);
        let path = KeyPath::parse("number_of_users");
        assert_eq!(resolver.value(&path), resolver.value(&path));
    }

    #[test]
    fn test_parameterized_comes_back_unevaluated() {
        let tree = tree();
        let resolver = Resolver::new(&tree);

        assert!(matches!(
            resolver.resolve(&KeyPath::parse("greeting")),
            Some(Resolved::Callable(_))
        ));
        assert_eq!(resolver.value(&KeyPath::parse("greeting")), None);
        assert_eq!(
            resolver.call(&KeyPath::parse("greeting"), &[json!("Ann")]),
            Some(json!("hi Ann (1 users)"))
        );
    }

    #[test]
    fn test_call_on_plain_data_is_none() {
        let tree = tree();
        assert_eq!(Resolver::new(&tree).call(&KeyPath::parse("users"), &[]), None);
    }

    #[test]
    fn test_materialized_map_resolves_nested_derived() {
        let tree = tree();
        let root = Resolver::new(&tree)
            .value(&KeyPath::root())
            .expect("root resolves");
        assert_eq!(
            root,
            json!({
                "users": [{ "name": "Ann" }],
                "number_of_users": 1
                // greeting is parameterized: omitted from plain data
            })
        );
    }

    #[test]
    fn test_indexing_through_a_computed_leaf() {
        let tree = StateTree::new(StateNode::map([(
            "summary",
            StateNode::computed(|_| json!({ "counts": [4, 5] })),
        )]));
        assert_eq!(
            Resolver::new(&tree).value(&KeyPath::parse("summary.counts.1")),
            Some(json!(5))
        );
    }

    #[test]
    fn test_array_elements_are_not_invoked() {
        let tree = StateTree::new(StateNode::map([(
            "items",
            StateNode::array([StateNode::from(1), StateNode::computed(|_| json!(9))]),
        )]));
        let resolver = Resolver::new(&tree);
        // a function directly inside an array is transparent data, never called
        assert_eq!(resolver.value(&KeyPath::parse("items.1")), Some(Value::Null));
        assert_eq!(
            resolver.value(&KeyPath::parse("items")),
            Some(json!([1, null]))
        );
    }

    #[test]
    fn test_reader_call_reaches_parameterized() {
        let tree = tree();
        let resolver = Resolver::new(&tree);
        let reader = resolver.reader();
        assert_eq!(
            reader.call("greeting", &[json!("Bo")]),
            Some(json!("hi Bo (1 users)"))
        );
    }
}
