//! Store error types.

use thiserror::Error;

use crate::store::path::KeyPath;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Dispatch addressed a path with no entry in the action tree.
    #[error("no action registered at `{path}`")]
    UnknownAction { path: KeyPath },

    /// Dispatch addressed something that is not a callable action. Raised at
    /// resolution time, before any mutation.
    #[error("`{path}` is not callable: only actions or namespaces can be defined in `actions`")]
    NotAnAction { path: KeyPath },

    /// An action body failed. The body's error is carried unmodified as the
    /// source; async bodies surface this only after the "errored"
    /// notification has been emitted.
    #[error("action `{path}` failed")]
    Action {
        path: KeyPath,
        #[source]
        source: anyhow::Error,
    },

    /// A write addressed a path the tree cannot hold.
    #[error("cannot write `{path}`: {reason}")]
    InvalidPath { path: KeyPath, reason: &'static str },

    /// A `call` addressed something other than a parameterized derived value.
    #[error("`{path}` does not resolve to a parameterized derived value")]
    NotCallable { path: KeyPath },

    /// An inbound time-travel jump carried no state payload.
    #[error("devtools jump carried no state payload")]
    MissingJumpState,

    /// An inbound state payload was not a JSON object of top-level keys.
    #[error("devtools state payload must be a JSON object")]
    NonObjectState,

    /// Inbound devtools JSON failed to parse.
    #[error("malformed devtools payload: {0}")]
    ReplayPayload(#[from] serde_json::Error),

    /// `IMPORT_STATE` carried an empty history.
    #[error("devtools import carried an empty history")]
    EmptyImport,
}
