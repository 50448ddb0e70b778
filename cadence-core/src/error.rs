//! Host-facing errors.
//!
//! User-program failures never show up here: they are ordinary
//! [`Value::Exception`](crate::value::Value::Exception) values. The types in
//! this module cover the engine's own failures (a stopped engine, a malformed
//! tree handed over by the parser, a broken internal invariant) and the
//! configuration layer.

use thiserror::Error;

use crate::ast::NodeId;

/// Errors returned by the engine to its host.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine was stopped; no further passes can run.
    #[error("engine has been stopped")]
    Stopped,

    /// A reachable node carries a blocking diagnostic and the engine is
    /// configured to refuse evaluation.
    #[error("evaluation blocked by conflict at node {node}: {message}")]
    BlockingConflict { node: NodeId, message: String },

    /// The pass was aborted at a step boundary and committed no value.
    #[error("pass was aborted before committing a value")]
    Aborted,

    /// The stream is not part of the catalog.
    #[error("unknown stream `{0}`")]
    UnknownStream(String),

    /// A value pushed into a stream does not match its declared shape.
    #[error("stream `{stream}` expects {expected}, got {found}")]
    StreamContract {
        stream: String,
        expected: &'static str,
        found: String,
    },

    /// An engine bug. Never caused by the user program.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("failed to encode event log: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode event log: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Errors raised while assembling a [`Tree`](crate::ast::Tree).
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node {child} is claimed by both {first} and {second}")]
    SharedChild {
        child: NodeId,
        first: NodeId,
        second: NodeId,
    },

    #[error("node {parent} refers to unknown child {child}")]
    UnknownChild { parent: NodeId, child: NodeId },

    #[error("child {child} must be created before its parent {parent}")]
    ChildAfterParent { parent: NodeId, child: NodeId },

    #[error("node {0} is not reachable from the root")]
    Orphan(NodeId),

    #[error("invalid tree description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
