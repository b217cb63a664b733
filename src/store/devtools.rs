//! Bridge to an external time-travel inspector.
//!
//! Outbound, the bridge pushes labeled snapshots; inbound, it replays
//! time-travel jumps, baseline commits, and history imports onto the live
//! tree. Replay-driven mutations commit with [`Origin::Replay`](crate::store::Origin) and are
//! never broadcast back; echo suppression is carried per commit, so
//! overlapping replays cannot trip over a shared guard flag. Without an
//! inspector attached every bridge operation is a no-op.
//!
//! Inbound payloads are parsed fail-fast: unparseable JSON and empty import
//! histories are rejected rather than silently ignored.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::store::error::StoreError;
use crate::store::path::KeyPath;
use crate::store::snapshot::Snapshot;
use crate::store::StoreInner;

/// Outbound transport to an attached inspector.
pub trait Inspector: Send + Sync {
    /// Reset the inspector's baseline state.
    fn init(&self, state: Value);
    /// Push one labeled state entry.
    fn send(&self, label: Value, state: Value);
}

/// Lifecycle phase of an async action bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Finished,
    Errored,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }
}

/// Label attached to an outbound entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    /// Plain text, e.g. `Update - 12:03:44`.
    Text(String),
    /// An action bracket message carrying the full dotted action path.
    Action {
        name: String,
        phase: Option<Phase>,
        args: Vec<Value>,
        error: Option<String>,
    },
}

impl Label {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Generic mutation-driven update label.
    pub fn update_now() -> Self {
        Self::Text(format!("Update - {}", Local::now().format("%H:%M:%S")))
    }

    pub fn action(
        path: &KeyPath,
        phase: Option<Phase>,
        args: Vec<Value>,
        error: Option<String>,
    ) -> Self {
        Self::Action {
            name: path.to_string(),
            phase,
            args,
            error,
        }
    }

    /// The JSON form sent over the wire: a plain string, or a record
    /// `{ "type": ..., "phase"?, "args"?, "error"? }`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Action {
                name,
                phase,
                args,
                error,
            } => {
                let mut record = serde_json::Map::new();
                record.insert("type".to_string(), Value::String(name.clone()));
                if let Some(phase) = phase {
                    record.insert(
                        "phase".to_string(),
                        Value::String(phase.as_str().to_string()),
                    );
                }
                if !args.is_empty() {
                    record.insert("args".to_string(), Value::Array(args.clone()));
                }
                if let Some(error) = error {
                    record.insert("error".to_string(), Value::String(error.clone()));
                }
                Value::Object(record)
            }
        }
    }
}

/// Outbound half of the bridge: labeled snapshots with identity-based
/// dedup of mutation-driven updates.
pub struct DevtoolsBridge {
    inspector: Option<Arc<dyn Inspector>>,
    last_sent: Mutex<Option<Snapshot>>,
}

impl DevtoolsBridge {
    pub fn new(inspector: Option<Arc<dyn Inspector>>) -> Self {
        Self {
            inspector,
            last_sent: Mutex::new(None),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inspector.is_some()
    }

    /// Mutation-driven update. Skipped when the snapshot is
    /// reference-identical to the last one sent: an identity check, not a
    /// deep comparison.
    pub fn send_update(&self, snapshot: &Snapshot) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        let mut last = self.last_sent.lock();
        if last.as_ref().is_some_and(|prev| prev.ptr_eq(snapshot)) {
            return;
        }
        *last = Some(snapshot.clone());
        inspector.send(Label::update_now().to_value(), snapshot.to_value());
    }

    /// Explicit labeled entry (action brackets, import replays); always
    /// sent, and advances the dedup baseline.
    pub fn send_action(&self, label: Label, snapshot: &Snapshot) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        *self.last_sent.lock() = Some(snapshot.clone());
        inspector.send(label.to_value(), snapshot.to_value());
    }

    /// Reset the inspector baseline.
    pub fn init(&self, snapshot: &Snapshot) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        *self.last_sent.lock() = Some(snapshot.clone());
        inspector.init(snapshot.to_value());
    }
}

/// Inbound inspector message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "DISPATCH")]
    Dispatch {
        payload: DispatchPayload,
        /// Stringified JSON of the top-level state keys, present on
        /// time-travel jumps.
        #[serde(default)]
        state: Option<String>,
    },
}

/// Sub-kind of an inbound `DISPATCH`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum DispatchPayload {
    #[serde(rename = "JUMP_TO_ACTION")]
    JumpToAction,
    #[serde(rename = "JUMP_TO_STATE")]
    JumpToState,
    #[serde(rename = "COMMIT")]
    Commit,
    #[serde(rename = "IMPORT_STATE")]
    ImportState {
        #[serde(rename = "nextLiftedState")]
        next_lifted_state: LiftedState,
    },
}

/// Inspector-side history: per-index action records plus the state after
/// each of them.
#[derive(Debug, Default, Deserialize)]
pub struct LiftedState {
    #[serde(rename = "actionsById", default)]
    pub actions_by_id: HashMap<String, Value>,
    #[serde(rename = "computedStates", default)]
    pub computed_states: Vec<ComputedState>,
}

#[derive(Debug, Deserialize)]
pub struct ComputedState {
    pub state: Value,
}

/// Apply one inbound message to the live tree.
pub(crate) fn handle_message(
    inner: &StoreInner,
    message: InboundMessage,
) -> Result<(), StoreError> {
    let InboundMessage::Dispatch { payload, state } = message;
    match payload {
        DispatchPayload::JumpToAction | DispatchPayload::JumpToState => {
            let raw = state.ok_or(StoreError::MissingJumpState)?;
            let next: Value = serde_json::from_str(&raw)?;
            let Value::Object(keys) = next else {
                return Err(StoreError::NonObjectState);
            };
            debug!(keys = keys.len(), "applying inspector state");
            for (key, value) in &keys {
                inner.assign_replay(key, value);
            }
            Ok(())
        }
        DispatchPayload::Commit => {
            debug!("re-initializing inspector baseline");
            inner.bridge().init(&inner.snapshot());
            Ok(())
        }
        DispatchPayload::ImportState { next_lifted_state } => {
            let entries = &next_lifted_state.computed_states;
            if entries.is_empty() {
                return Err(StoreError::EmptyImport);
            }
            debug!(entries = entries.len(), "importing inspector history");
            for (index, entry) in entries.iter().enumerate() {
                let Value::Object(keys) = &entry.state else {
                    return Err(StoreError::NonObjectState);
                };
                for (key, value) in keys {
                    inner.assign_replay(key, value);
                }
                if index == 0 {
                    inner.bridge().init(&inner.snapshot());
                } else {
                    let label = next_lifted_state
                        .actions_by_id
                        .get(&index.to_string())
                        .and_then(action_label)
                        .unwrap_or_else(|| {
                            format!("Update - {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
                        });
                    inner
                        .bridge()
                        .send_action(Label::text(label), &inner.snapshot());
                }
            }
            Ok(())
        }
    }
}

/// Dig the action name out of a lifted-state record
/// (`{ "action": { "type": ... } }`, with a flat `type` fallback).
fn action_label(record: &Value) -> Option<String> {
    record
        .get("action")
        .and_then(|action| action.get("type"))
        .or_else(|| record.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
