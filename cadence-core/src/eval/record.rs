//! What a pass did, kept aside until the pass commits.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::ast::NodeId;
use crate::value::Value;

/// A node value produced during the pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub value: Value,
    pub reusable: bool,
    pub reaction: bool,
    pub stream_version: Option<u64>,
}

/// Whether a bind's value differs from its committed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Changed,
    Unchanged,
}

/// The overlay of one pass.
#[derive(Debug, Default)]
pub struct PassRecord {
    /// Values of evaluated nodes; the last write of a node wins.
    pub writes: IndexMap<NodeId, Write>,
    /// Maybe-dirty nodes that were verified and reused.
    pub cleaned: Vec<NodeId>,
    pub bind_outcomes: HashMap<NodeId, BindOutcome>,
    /// Stream reads as (stream, reader).
    pub subscriptions: IndexSet<(Arc<str>, NodeId)>,
    /// `Changed` nodes that read true.
    pub edge_triggered: IndexSet<NodeId>,
    /// Unavailable streams that were read.
    pub degraded: IndexSet<Arc<str>>,
    /// On-demand streams that were read.
    pub demands: IndexSet<Arc<str>>,
    /// How often each node ran its steps.
    pub evaluations: HashMap<NodeId, usize>,
    pub evaluated: usize,
    pub reused: usize,
    pub steps: usize,
}

impl PassRecord {
    pub(crate) fn count_evaluation(&mut self, node: NodeId) {
        self.evaluated += 1;
        *self.evaluations.entry(node).or_default() += 1;
    }

    pub fn value(&self, node: NodeId) -> Option<&Value> {
        self.writes.get(&node).map(|write| &write.value)
    }

    pub fn bind_outcome(&self, bind: NodeId) -> Option<BindOutcome> {
        self.bind_outcomes.get(&bind).copied()
    }
}
