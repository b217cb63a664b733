//! Action dispatch and call-shape classification.
//!
//! Every dispatch classifies its action exactly once into one of four call
//! shapes (sync/async, with/without explicit arguments) from the tagged
//! effect the handler returns, then emits one devtools notification bracket
//! for the shape: a single labeled message for sync actions, a
//! started/finished-or-errored pair for async ones. Classification happens
//! fresh on each invocation; there is no persistent per-action state.

use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker;
use serde_json::Value;
use tracing::{debug, warn};

use crate::store::devtools::{Label, Phase};
use crate::store::error::StoreError;
use crate::store::node::{ActionHandler, ActionNode, StateNode};
use crate::store::path::{KeyPath, Segment};
use crate::store::view::Resolved;
use crate::store::{Origin, StoreInner};

/// Future driven by an asynchronous action body.
pub type ActionFuture = BoxFuture<'static, Result<(), anyhow::Error>>;

/// Inner closure of an argument-taking action.
pub type ArgsFn = Box<dyn FnOnce(Vec<Value>) -> Result<ArgsEffect, anyhow::Error> + Send>;

/// First-call outcome of an action handler.
pub enum ActionEffect {
    /// Ran to completion synchronously, no explicit arguments.
    Done,
    /// Wants the caller's argument payload; the inner closure runs next.
    WithArgs(ArgsFn),
    /// Suspended; the future must be driven to completion.
    Async(ActionFuture),
}

/// Second-call outcome of an argument-taking action.
pub enum ArgsEffect {
    Done,
    Async(ActionFuture),
}

/// Call shape of one dispatch, fixed at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Sync,
    SyncWithArgs,
    Async,
    AsyncWithArgs,
}

/// Context injected into every action body: live handles, not snapshots.
#[derive(Clone)]
pub struct ActionContext {
    pub state: StateHandle,
    pub actions: ActionsHandle,
}

/// Live read/write access to the store's state tree.
///
/// Reads resolve derived values; writes commit one mutation notification
/// per call, tagged with this handle's origin.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<StoreInner>,
    origin: Origin,
}

impl StateHandle {
    pub(crate) fn new(inner: Arc<StoreInner>, origin: Origin) -> Self {
        Self { inner, origin }
    }

    /// Resolved read; `None` when the path is missing or parameterized.
    pub fn get(&self, path: impl Into<KeyPath>) -> Option<Value> {
        match self.inner.resolve(&path.into())? {
            Resolved::Value(value) => Some(value),
            Resolved::Callable(_) => None,
        }
    }

    /// Evaluate a parameterized derived value with explicit arguments.
    pub fn call(&self, path: impl Into<KeyPath>, args: &[Value]) -> Result<Value, StoreError> {
        let path = path.into();
        self.inner
            .call_derived(&path, args)
            .ok_or(StoreError::NotCallable { path })
    }

    /// Raw read: the live, unresolved node, including derived leaves.
    pub fn raw(&self, path: impl Into<KeyPath>) -> Option<StateNode> {
        self.inner.raw_node(&path.into())
    }

    /// Replace the node at `path` and commit the mutation.
    pub fn set(
        &self,
        path: impl Into<KeyPath>,
        value: impl Into<StateNode>,
    ) -> Result<(), StoreError> {
        self.inner.set(&path.into(), value.into(), self.origin)
    }

    /// Append to the array at `path` and commit the mutation.
    pub fn push(
        &self,
        path: impl Into<KeyPath>,
        value: impl Into<StateNode>,
    ) -> Result<(), StoreError> {
        self.inner.push(&path.into(), value.into(), self.origin)
    }
}

/// Dispatch access for action bodies, for invoking sibling actions.
#[derive(Clone)]
pub struct ActionsHandle {
    inner: Arc<StoreInner>,
}

impl ActionsHandle {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub fn dispatch(
        &self,
        path: impl Into<KeyPath>,
        args: Vec<Value>,
    ) -> Result<DispatchOutcome, StoreError> {
        dispatch(&self.inner, path.into(), args)
    }
}

/// Result of a dispatch: completed on the caller, or still in flight.
pub enum DispatchOutcome {
    Completed,
    Pending(BoxFuture<'static, Result<(), StoreError>>),
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Drive the remainder of an async action; a no-op for completed ones.
    pub async fn finish(self) -> Result<(), StoreError> {
        match self {
            Self::Completed => Ok(()),
            Self::Pending(fut) => fut.await,
        }
    }
}

impl fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Pending(_) => write!(f, "Pending(..)"),
        }
    }
}

/// Walk the action tree to the handler at `path`. Namespaces resolve
/// segment by segment; anything else is a configuration error, raised
/// before any mutation.
fn resolve_handler(actions: &ActionNode, path: &KeyPath) -> Result<ActionHandler, StoreError> {
    let mut node = actions;
    for segment in path.segments() {
        let Segment::Key(key) = segment else {
            return Err(StoreError::NotAnAction { path: path.clone() });
        };
        node = match node {
            ActionNode::Namespace(map) => {
                map.get(key).ok_or_else(|| StoreError::UnknownAction {
                    path: path.clone(),
                })?
            }
            ActionNode::Handler(_) => {
                return Err(StoreError::NotAnAction { path: path.clone() })
            }
        };
    }
    match node {
        ActionNode::Handler(handler) => Ok(handler.clone()),
        ActionNode::Namespace(_) => Err(StoreError::NotAnAction { path: path.clone() }),
    }
}

pub(crate) fn dispatch(
    inner: &Arc<StoreInner>,
    path: KeyPath,
    args: Vec<Value>,
) -> Result<DispatchOutcome, StoreError> {
    let handler = resolve_handler(inner.actions(), &path)?;

    let ctx = ActionContext {
        state: StateHandle::new(Arc::clone(inner), Origin::Action),
        actions: ActionsHandle::new(Arc::clone(inner)),
    };

    let first = handler.invoke(ctx).map_err(|source| StoreError::Action {
        path: path.clone(),
        source,
    })?;

    match first {
        ActionEffect::Done => {
            debug!(action = %path, kind = ?ActionKind::Sync, "action completed");
            inner
                .bridge()
                .send_action(Label::action(&path, None, Vec::new(), None), &inner.snapshot());
            Ok(DispatchOutcome::Completed)
        }
        ActionEffect::WithArgs(with_args) => {
            let second = with_args(args.clone()).map_err(|source| StoreError::Action {
                path: path.clone(),
                source,
            })?;
            match second {
                ArgsEffect::Done => {
                    debug!(action = %path, kind = ?ActionKind::SyncWithArgs, "action completed");
                    inner.bridge().send_action(
                        Label::action(&path, None, args, None),
                        &inner.snapshot(),
                    );
                    Ok(DispatchOutcome::Completed)
                }
                ArgsEffect::Async(fut) => {
                    start_async(inner, path, args, ActionKind::AsyncWithArgs, fut)
                }
            }
        }
        ActionEffect::Async(fut) => start_async(inner, path, Vec::new(), ActionKind::Async, fut),
    }
}

/// Drive an async body: run it up to its first suspension on the caller,
/// so mutations before the first await land synchronously, bracket it with
/// started/finished-or-errored notifications, and hand the remainder back
/// as a pending outcome.
fn start_async(
    inner: &Arc<StoreInner>,
    path: KeyPath,
    args: Vec<Value>,
    kind: ActionKind,
    mut fut: ActionFuture,
) -> Result<DispatchOutcome, StoreError> {
    let waker = noop_waker();
    let mut cx = TaskContext::from_waker(&waker);
    let eager = fut.as_mut().poll(&mut cx);

    debug!(action = %path, kind = ?kind, "action started");
    inner.bridge().send_action(
        Label::action(&path, Some(Phase::Started), args, None),
        &inner.snapshot(),
    );

    match eager {
        // the body never actually suspended; settle the bracket here
        Poll::Ready(result) => {
            settle(inner, &path, result.as_ref().err());
            result
                .map(|_| DispatchOutcome::Completed)
                .map_err(|source| StoreError::Action { path, source })
        }
        Poll::Pending => {
            let inner = Arc::clone(inner);
            Ok(DispatchOutcome::Pending(Box::pin(async move {
                let result = fut.await;
                settle(&inner, &path, result.as_ref().err());
                result.map_err(|source| StoreError::Action { path, source })
            })))
        }
    }
}

fn settle(inner: &StoreInner, path: &KeyPath, error: Option<&anyhow::Error>) {
    match error {
        None => {
            debug!(action = %path, "action finished");
            inner.bridge().send_action(
                Label::action(path, Some(Phase::Finished), Vec::new(), None),
                &inner.snapshot(),
            );
        }
        Some(error) => {
            warn!(action = %path, error = %error, "action errored");
            inner.bridge().send_action(
                Label::action(path, Some(Phase::Errored), Vec::new(), Some(error.to_string())),
                &inner.snapshot(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::store::{create_store, Store, StoreDefinition};

    fn counter_store() -> Store {
        let definition = StoreDefinition::new(
            StateNode::map([("count", StateNode::from(0)), ("flag", StateNode::from(false))]),
            ActionNode::namespace([
                (
                    "increment",
                    ActionNode::sync(|ctx| {
                        let count = ctx.state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                        ctx.state.set("count", count + 1)?;
                        Ok(())
                    }),
                ),
                (
                    "add",
                    ActionNode::with_args(|ctx, args| {
                        let by = args.first().and_then(Value::as_i64).unwrap_or(0);
                        let count = ctx.state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
                        ctx.state.set("count", count + by)?;
                        Ok(())
                    }),
                ),
                (
                    "toggle",
                    ActionNode::async_fn(|ctx| async move {
                        ctx.state.set("flag", true)?;
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        ctx.state.set("flag", false)?;
                        Ok(())
                    }),
                ),
                (
                    "fail",
                    ActionNode::sync(|_| Err(anyhow::anyhow!("nope"))),
                ),
                (
                    "fail_later",
                    ActionNode::async_fn(|_| async {
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Err(anyhow::anyhow!("delayed failure"))
                    }),
                ),
                (
                    "nested",
                    ActionNode::namespace([(
                        "bump_twice",
                        ActionNode::sync(|ctx| {
                            ctx.actions.dispatch("increment", vec![])?;
                            ctx.actions.dispatch("increment", vec![])?;
                            Ok(())
                        }),
                    )]),
                ),
            ]),
        );
        create_store(definition, "Counter")
    }

    #[test]
    fn test_sync_action_mutates_and_notifies_once() {
        let store = counter_store();
        let notifications = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notifications);
        store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = store.dispatch("increment", vec![]).unwrap();
        assert!(outcome.is_completed());
        assert_eq!(store.get("count"), Some(json!(1)));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_action_with_args() {
        let store = counter_store();
        let outcome = store.dispatch("add", vec![json!(4)]).unwrap();
        assert!(outcome.is_completed());
        assert_eq!(store.get("count"), Some(json!(4)));
    }

    #[test]
    fn test_namespaced_dispatch_and_sibling_actions() {
        let store = counter_store();
        store.dispatch("nested.bump_twice", vec![]).unwrap();
        assert_eq!(store.get("count"), Some(json!(2)));
    }

    #[test]
    fn test_unknown_and_non_callable_paths_fail_before_mutation() {
        let store = counter_store();

        let err = store.dispatch("missing", vec![]).unwrap_err();
        assert!(matches!(err, StoreError::UnknownAction { .. }));

        // a namespace is not callable
        let err = store.dispatch("nested", vec![]).unwrap_err();
        assert!(matches!(err, StoreError::NotAnAction { .. }));

        assert_eq!(store.get("count"), Some(json!(0)));
    }

    #[test]
    fn test_sync_error_propagates() {
        let store = counter_store();
        let err = store.dispatch("fail", vec![]).unwrap_err();
        let StoreError::Action { source, .. } = err else {
            panic!("expected an action error");
        };
        assert_eq!(source.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_async_action_runs_eagerly_to_first_suspension() {
        let store = counter_store();

        let outcome = store.dispatch("toggle", vec![]).unwrap();
        // the body ran up to its sleep before dispatch returned
        assert_eq!(store.get("flag"), Some(json!(true)));
        assert!(!outcome.is_completed());

        outcome.finish().await.unwrap();
        assert_eq!(store.get("flag"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_async_error_surfaces_from_finish() {
        let store = counter_store();
        let outcome = store.dispatch("fail_later", vec![]).unwrap();
        let err = outcome.finish().await.unwrap_err();
        let StoreError::Action { source, .. } = err else {
            panic!("expected an action error");
        };
        assert_eq!(source.to_string(), "delayed failure");
    }
}
