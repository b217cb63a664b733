//! Driftwood State Library
//!
//! This crate provides a reactive state container: consumers read
//! application state (including lazily-computed derived values) and invoke
//! mutating actions, while every state transition can be mirrored to an
//! external time-travel inspector.
//!
//! # Overview
//!
//! The store module provides:
//!
//! - **Mutable State Tree** - One deeply-mutable tree of application data;
//!   every write at any depth commits exactly one mutation notification.
//!
//! - **Derived Value Resolver** - A read-only recursive view that evaluates
//!   function-valued leaves against current state on every traversal, with
//!   no caching.
//!
//! - **Action Dispatcher** - Classifies each invocation into one of four
//!   call shapes (sync/async × with/without arguments) and injects live
//!   `{state, actions}` context into the body.
//!
//! - **Snapshot Service** - Immutable, structurally-shared copies of the
//!   tree, cheap to compare by identity.
//!
//! - **DevTools Bridge** - Pushes labeled snapshots to an optional external
//!   inspector and replays inbound time-travel commands onto the live tree
//!   while suppressing echo.
//!
//! # Design Principles
//!
//! 1. **Shape over schema** - Trees distinguish plain data, namespaces,
//!    derived values, and callable actions purely by node shape.
//!
//! 2. **Explicit classification** - Call shapes and mutation origins are
//!    tagged values threaded through the code, not ambient flags.
//!
//! 3. **No hidden synchronization** - Concurrently running async actions
//!    may interleave over overlapping paths; the store does not serialize
//!    them.
//!
//! 4. **Inspector-ready** - Resolved state converts to JSON for the
//!    devtools wire.
//!
//! # Example
//!
//! ```rust
//! use driftwood_state::store::{create_store, ActionNode, StateNode, StoreDefinition};
//! use serde_json::json;
//!
//! let definition = StoreDefinition::new(
//!     StateNode::map([
//!         ("count", StateNode::from(0)),
//!         ("doubled", StateNode::computed(|state| {
//!             let count = state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
//!             json!(count * 2)
//!         })),
//!     ]),
//!     ActionNode::namespace([
//!         ("increment", ActionNode::sync(|ctx| {
//!             let count = ctx.state.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
//!             ctx.state.set("count", count + 1)?;
//!             Ok(())
//!         })),
//!     ]),
//! );
//!
//! let store = create_store(definition, "Counter");
//! store.dispatch("increment", vec![]).unwrap();
//!
//! assert_eq!(store.get("count"), Some(json!(1)));
//! assert_eq!(store.get("doubled"), Some(json!(2)));
//! ```

pub mod store;

// Re-export everything from the store module at crate root
pub use store::*;
