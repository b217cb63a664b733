//! Reactive store runtime.
//!
//! This module provides the store core and its collaborators:
//!
//! - `path` - Dotted-path addressing into trees
//! - `node` - State and action tree nodes
//! - `tree` - The live, mutable state tree
//! - `view` - Read-side resolution of derived values
//! - `snapshot` - Immutable, structurally-shared snapshots
//! - `actions` - Action dispatch and call-shape classification
//! - `devtools` - Bridge to an external time-travel inspector
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Store                               │
//! │                                                                  │
//! │  dispatch(path, args)                                            │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  ┌───────────────┐   {state, actions}   ┌────────────────────┐  │
//! │  │  Dispatcher   │─────────────────────▶│    action body     │  │
//! │  └───────────────┘                      └─────────┬──────────┘  │
//! │                                                   │ mutates     │
//! │                                                   ▼             │
//! │  ┌───────────────┐     commit(path,     ┌────────────────────┐  │
//! │  │  subscribers  │◀────────origin)──────│     StateTree      │  │
//! │  └───────────────┘                      └─────────┬──────────┘  │
//! │                                                   │ resolves    │
//! │  ┌───────────────┐      snapshot        ┌─────────▼──────────┐  │
//! │  │ DevtoolsBridge│◀─────(shared)────────│  Resolver/Builder  │  │
//! │  └───────┬───────┘                      └────────────────────┘  │
//! │          │ unless Origin::Replay                                │
//! │          ▼                                                      │
//! │     external inspector ──── time-travel replay ──── back in     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads go through the resolver, so derived leaves evaluate lazily on
//! traversal. Writes commit exactly one mutation each, notify subscribers
//! synchronously, and forward a snapshot to the inspector unless the commit
//! originated from inspector replay.

pub mod actions;
pub mod devtools;
pub mod error;
pub mod node;
pub mod path;
pub mod snapshot;
pub mod tree;
pub mod view;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

pub use actions::{
    ActionContext, ActionEffect, ActionFuture, ActionKind, ActionsHandle, ArgsEffect, ArgsFn,
    DispatchOutcome, StateHandle,
};
pub use devtools::{
    ComputedState, DevtoolsBridge, DispatchPayload, InboundMessage, Inspector, Label, LiftedState,
    Phase,
};
pub use error::StoreError;
pub use node::{ActionHandler, ActionNode, ComputedFn, Derived, ParameterizedFn, StateNode};
pub use path::{KeyPath, Segment};
pub use snapshot::{SnapNode, Snapshot};
pub use tree::StateTree;
pub use view::{Resolved, Resolver, StateReader, StateView};

use snapshot::SnapshotBuilder;

/// Where a mutation came from. Decides devtools forwarding: local commits
/// are forwarded, action commits are covered by their dispatch bracket,
/// replay commits are suppressed (they *are* the inspector's own state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Direct mutation through a state handle.
    Local,
    /// Mutation from inside a dispatched action body.
    Action,
    /// Mutation replayed from the inspector; never broadcast back.
    Replay,
}

/// One committed mutation, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub path: KeyPath,
    pub origin: Origin,
}

/// Handle returned by `subscribe`, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Initial state and action trees for a store.
pub struct StoreDefinition {
    pub state: StateNode,
    pub actions: ActionNode,
}

impl StoreDefinition {
    pub fn new(state: StateNode, actions: ActionNode) -> Self {
        Self { state, actions }
    }
}

type SubscriberFn = Arc<dyn Fn(&Mutation) + Send + Sync>;

struct SnapCache {
    last: Option<Snapshot>,
    dirty: Vec<KeyPath>,
}

pub(crate) struct StoreInner {
    name: String,
    state: RwLock<StateTree>,
    actions: ActionNode,
    subscribers: RwLock<Vec<(SubscriptionId, SubscriberFn)>>,
    next_subscription: AtomicU64,
    cache: Mutex<SnapCache>,
    bridge: DevtoolsBridge,
}

impl StoreInner {
    pub(crate) fn actions(&self) -> &ActionNode {
        &self.actions
    }

    pub(crate) fn bridge(&self) -> &DevtoolsBridge {
        &self.bridge
    }

    pub(crate) fn resolve(&self, path: &KeyPath) -> Option<Resolved> {
        let tree = self.state.read();
        Resolver::new(&*tree).resolve(path)
    }

    pub(crate) fn call_derived(&self, path: &KeyPath, args: &[Value]) -> Option<Value> {
        let tree = self.state.read();
        Resolver::new(&*tree).call(path, args)
    }

    pub(crate) fn raw_node(&self, path: &KeyPath) -> Option<StateNode> {
        self.state.read().get(path).cloned()
    }

    pub(crate) fn set(
        &self,
        path: &KeyPath,
        value: StateNode,
        origin: Origin,
    ) -> Result<(), StoreError> {
        self.state.write().set(path, value)?;
        self.commit(path.clone(), origin);
        Ok(())
    }

    pub(crate) fn push(
        &self,
        path: &KeyPath,
        value: StateNode,
        origin: Origin,
    ) -> Result<(), StoreError> {
        self.state.write().push(path, value)?;
        self.commit(path.clone(), origin);
        Ok(())
    }

    pub(crate) fn assign_replay(&self, key: &str, value: &Value) {
        self.state.write().assign_replay(key, value);
        self.commit(KeyPath::from_key(key), Origin::Replay);
    }

    /// A fully-resolved snapshot. With nothing dirty this is the cached
    /// copy: identical allocation, cheap to compare.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let tree = self.state.read();
        let mut cache = self.cache.lock();
        if cache.dirty.is_empty() {
            if let Some(last) = &cache.last {
                return last.clone();
            }
        }
        let snapshot = SnapshotBuilder::build(&tree, cache.last.as_ref(), &cache.dirty);
        cache.dirty.clear();
        cache.last = Some(snapshot.clone());
        snapshot
    }

    /// Commit one mutation: record it for snapshot diffing, notify
    /// subscribers synchronously, and forward to the inspector per origin.
    fn commit(&self, path: KeyPath, origin: Origin) {
        trace!(path = %path, origin = ?origin, "mutation committed");
        self.cache.lock().dirty.push(path.clone());

        let mutation = Mutation { path, origin };
        // collect first, so a subscriber may subscribe/unsubscribe reentrantly
        let subscribers: Vec<SubscriberFn> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in &subscribers {
            callback(&mutation);
        }

        match origin {
            Origin::Local => self.bridge.send_update(&self.snapshot()),
            // one bracket per dispatch covers action-driven mutations
            Origin::Action => {}
            // echo suppression: replayed state never goes back out
            Origin::Replay => {}
        }
    }
}

/// A reactive state container: one live state tree, one action tree, and
/// an optional mirror to an external time-travel inspector.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store without an inspector attached.
    pub fn new(definition: StoreDefinition, name: impl Into<String>) -> Self {
        Self::build(definition, name.into(), None)
    }

    /// Create a store mirrored to an external inspector.
    pub fn with_inspector(
        definition: StoreDefinition,
        name: impl Into<String>,
        inspector: Arc<dyn Inspector>,
    ) -> Self {
        Self::build(definition, name.into(), Some(inspector))
    }

    fn build(
        definition: StoreDefinition,
        name: String,
        inspector: Option<Arc<dyn Inspector>>,
    ) -> Self {
        let inner = Arc::new(StoreInner {
            name,
            state: RwLock::new(StateTree::new(definition.state)),
            actions: definition.actions,
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            cache: Mutex::new(SnapCache {
                last: None,
                dirty: Vec::new(),
            }),
            bridge: DevtoolsBridge::new(inspector),
        });
        if inner.bridge.is_attached() {
            let snapshot = inner.snapshot();
            inner
                .bridge
                .send_action(Label::text(format!("{} started", inner.name)), &snapshot);
        }
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A live handle committing with [`Origin::Local`].
    pub fn state(&self) -> StateHandle {
        StateHandle::new(Arc::clone(&self.inner), Origin::Local)
    }

    /// Resolved read; `None` when the path is missing or parameterized.
    pub fn get(&self, path: impl Into<KeyPath>) -> Option<Value> {
        self.state().get(path)
    }

    /// Evaluate a parameterized derived value with explicit arguments.
    pub fn call(&self, path: impl Into<KeyPath>, args: &[Value]) -> Result<Value, StoreError> {
        self.state().call(path, args)
    }

    /// Raw read: the live, unresolved node, including derived leaves.
    pub fn raw(&self, path: impl Into<KeyPath>) -> Option<StateNode> {
        self.state().raw(path)
    }

    /// Resolve and invoke the action at `path`.
    pub fn dispatch(
        &self,
        path: impl Into<KeyPath>,
        args: Vec<Value>,
    ) -> Result<DispatchOutcome, StoreError> {
        actions::dispatch(&self.inner, path.into(), args)
    }

    /// Register a callback fired synchronously after every committed
    /// mutation. Reads never notify.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Mutation) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription; returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(registered, _)| *registered != id);
        subscribers.len() != before
    }

    /// Convenience registration receiving the resolved state after each
    /// mutation.
    pub fn on_snapshot<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                callback(&inner.snapshot());
            }
        })
    }

    /// An immutable, fully-resolved snapshot of current state.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    /// Apply one inbound inspector message (time-travel jump, baseline
    /// commit, or history import).
    pub fn devtools_message(&self, message: InboundMessage) -> Result<(), StoreError> {
        devtools::handle_message(&self.inner, message)
    }

    /// Parse and apply an inbound inspector message from wire JSON.
    pub fn devtools_message_json(&self, raw: &str) -> Result<(), StoreError> {
        let message: InboundMessage = serde_json::from_str(raw)?;
        self.devtools_message(message)
    }
}

/// Create a store from its definition.
pub fn create_store(definition: StoreDefinition, name: &str) -> Store {
    Store::new(definition, name)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn user_store() -> Store {
        let definition = StoreDefinition::new(
            StateNode::map([
                ("users", StateNode::from(json!([]))),
                (
                    "number_of_users",
                    StateNode::computed(|state| {
                        json!(state
                            .get("users")
                            .and_then(|v| v.as_array().map(Vec::len))
                            .unwrap_or(0))
                    }),
                ),
            ]),
            ActionNode::namespace([(
                "users",
                ActionNode::namespace([(
                    "addUser",
                    ActionNode::with_args(|ctx, args| {
                        let name = args
                            .first()
                            .and_then(Value::as_str)
                            .unwrap_or("anonymous")
                            .to_string();
                        let id = ctx
                            .state
                            .get("number_of_users")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0);
                        ctx.state
                            .push("users", StateNode::from(json!({ "id": id, "name": name })))?;
                        Ok(())
                    }),
                )]),
            )]),
        );
        create_store(definition, "Users")
    }

    #[test]
    fn test_end_to_end_derived_over_mutated_state() {
        let store = user_store();
        assert_eq!(store.get("number_of_users"), Some(json!(0)));

        store.dispatch("users.addUser", vec![json!("Ann")]).unwrap();

        assert_eq!(store.get("number_of_users"), Some(json!(1)));
        assert_eq!(store.get("users.0.name"), Some(json!("Ann")));
    }

    #[test]
    fn test_raw_read_returns_unresolved_derived() {
        let store = user_store();
        assert!(matches!(
            store.raw("number_of_users"),
            Some(StateNode::Derived(_))
        ));
        // resolution is the read side's job, not the tree's
        assert_eq!(store.get("number_of_users"), Some(json!(0)));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let store = user_store();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.state().set("users", json!([])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id)); // already gone

        store.state().set("users", json!([])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reads_do_not_notify() {
        let store = user_store();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let _ = store.get("number_of_users");
        let _ = store.snapshot();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_on_snapshot_receives_resolved_state() {
        let store = user_store();
        let last = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&last);
        store.on_snapshot(move |snapshot| {
            *sink.lock() = Some(snapshot.to_value());
        });

        store.dispatch("users.addUser", vec![json!("Bo")]).unwrap();

        let value = last.lock().clone().expect("snapshot delivered");
        assert_eq!(value["number_of_users"], json!(1));
        assert_eq!(value["users"][0]["name"], json!("Bo"));
    }

    #[test]
    fn test_snapshot_identity_without_mutation() {
        let store = user_store();
        let first = store.snapshot();
        let second = store.snapshot();
        assert!(first.ptr_eq(&second));
        assert_eq!(first, second); // and deep-equal, trivially

        store.dispatch("users.addUser", vec![json!("Ann")]).unwrap();
        let third = store.snapshot();
        assert!(!third.ptr_eq(&second));
    }

    #[test]
    fn test_set_through_store_handle() {
        let store = user_store();
        store
            .state()
            .set("users", json!([{ "id": 0, "name": "Cy" }]))
            .unwrap();
        assert_eq!(store.get("number_of_users"), Some(json!(1)));
    }
}
