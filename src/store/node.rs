//! State and action tree nodes.
//!
//! A state tree mixes plain data with derived-value leaves; an action tree
//! mixes callable handlers with nested namespaces. Both are fixed in shape
//! at store construction: values change at runtime, keys do not (devtools
//! replay being the one exception, which may inject new top-level keys).

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::store::actions::{ActionContext, ActionEffect, ArgsEffect};
use crate::store::view::StateReader;

/// A derived value computed from current state on every read.
pub type ComputedFn = Arc<dyn Fn(&StateReader<'_>) -> Value + Send + Sync>;

/// A derived value additionally parameterized by explicit caller arguments.
pub type ParameterizedFn = Arc<dyn Fn(&StateReader<'_>, &[Value]) -> Value + Send + Sync>;

/// Derived-value leaf. Never stored as a result: every read re-evaluates.
///
/// Derived functions must be pure and side-effect-free. That contract is the
/// author's to uphold, not the resolver's to enforce.
#[derive(Clone)]
pub enum Derived {
    /// `(state) -> value`
    Computed(ComputedFn),
    /// `(state) -> (args) -> value`: resolution returns this unevaluated,
    /// the consumer supplies arguments later via `call`.
    Parameterized(ParameterizedFn),
}

/// A node in the state tree.
#[derive(Clone)]
pub enum StateNode {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<StateNode>),
    Map(BTreeMap<String, StateNode>),
    Derived(Derived),
}

impl StateNode {
    /// Build a map node from key/node pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, StateNode)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, node)| (key.into(), node))
                .collect(),
        )
    }

    /// Build an array node.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = StateNode>,
    {
        Self::Array(items.into_iter().collect())
    }

    /// A derived value computed from current state.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&StateReader<'_>) -> Value + Send + Sync + 'static,
    {
        Self::Derived(Derived::Computed(Arc::new(f)))
    }

    /// A derived value taking explicit arguments at call time.
    pub fn parameterized<F>(f: F) -> Self
    where
        F: Fn(&StateReader<'_>, &[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Derived(Derived::Parameterized(Arc::new(f)))
    }

    /// True when this subtree holds at least one derived leaf.
    pub fn contains_derived(&self) -> bool {
        match self {
            Self::Derived(_) => true,
            Self::Array(items) => items.iter().any(StateNode::contains_derived),
            Self::Map(map) => map.values().any(StateNode::contains_derived),
            _ => false,
        }
    }
}

impl From<Value> for StateNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(StateNode::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| (key, StateNode::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for StateNode {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for StateNode {
    fn from(n: i32) -> Self {
        Self::Number(serde_json::Number::from(n))
    }
}

impl From<i64> for StateNode {
    fn from(n: i64) -> Self {
        Self::Number(serde_json::Number::from(n))
    }
}

impl From<u64> for StateNode {
    fn from(n: u64) -> Self {
        Self::Number(serde_json::Number::from(n))
    }
}

impl From<f64> for StateNode {
    fn from(n: f64) -> Self {
        // Non-finite floats have no JSON form
        serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for StateNode {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for StateNode {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Self::Derived(Derived::Computed(_)) => write!(f, "Derived(<computed>)"),
            Self::Derived(Derived::Parameterized(_)) => write!(f, "Derived(<parameterized>)"),
        }
    }
}

impl PartialEq for StateNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            // Derived leaves compare by definition identity
            (Self::Derived(Derived::Computed(a)), Self::Derived(Derived::Computed(b))) => {
                Arc::ptr_eq(a, b)
            }
            (
                Self::Derived(Derived::Parameterized(a)),
                Self::Derived(Derived::Parameterized(b)),
            ) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A callable action definition.
#[derive(Clone)]
pub struct ActionHandler(
    Arc<dyn Fn(ActionContext) -> Result<ActionEffect, anyhow::Error> + Send + Sync>,
);

impl ActionHandler {
    pub(crate) fn invoke(&self, ctx: ActionContext) -> Result<ActionEffect, anyhow::Error> {
        (self.0)(ctx)
    }
}

/// A node in the action tree: a callable handler or a nested namespace.
/// Primitives and arrays are unrepresentable here by construction.
#[derive(Clone)]
pub enum ActionNode {
    Handler(ActionHandler),
    Namespace(BTreeMap<String, ActionNode>),
}

impl ActionNode {
    /// Raw handler returning an explicit [`ActionEffect`] classification.
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(ActionContext) -> Result<ActionEffect, anyhow::Error> + Send + Sync + 'static,
    {
        Self::Handler(ActionHandler(Arc::new(f)))
    }

    /// Build a namespace from key/node pairs.
    pub fn namespace<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ActionNode)>,
    {
        Self::Namespace(
            entries
                .into_iter()
                .map(|(key, node)| (key.into(), node))
                .collect(),
        )
    }

    /// Synchronous action without explicit arguments.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ActionContext) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        Self::handler(move |ctx| {
            f(&ctx)?;
            Ok(ActionEffect::Done)
        })
    }

    /// Synchronous action taking the caller's argument payload.
    pub fn with_args<F>(f: F) -> Self
    where
        F: Fn(&ActionContext, &[Value]) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::handler(move |ctx| {
            let f = Arc::clone(&f);
            Ok(ActionEffect::WithArgs(Box::new(move |args| {
                f(&ctx, &args)?;
                Ok(ArgsEffect::Done)
            })))
        })
    }

    /// Asynchronous action without explicit arguments.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        Self::handler(move |ctx| Ok(ActionEffect::Async(Box::pin(f(ctx)))))
    }

    /// Asynchronous action taking the caller's argument payload.
    pub fn async_with_args<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::handler(move |ctx| {
            let f = Arc::clone(&f);
            Ok(ActionEffect::WithArgs(Box::new(move |args| {
                Ok(ArgsEffect::Async(Box::pin(f(ctx, args))))
            })))
        })
    }
}

impl fmt::Debug for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => write!(f, "Handler(<action>)"),
            Self::Namespace(map) => f
                .debug_map()
                .entries(map.iter().map(|(key, node)| (key, node)))
                .finish(),
        }
    }
}
