//! Evaluation
//!
//! An explicit-stack interpreter over generated step sequences.
//!
//! # Overview
//!
//! Entering a node pushes a [`Frame`](frame::Frame) that runs the node's
//! steps; finishing it pops the frame and pushes the value onto the parent
//! frame. Before entering a child, the evaluator asks the staleness graph
//! whether the child's cached value still holds. If it does, the value is
//! pushed directly and none of the child's steps run.
//!
//! Nothing the evaluator does is visible outside the pass until the pass
//! commits: node values, subscriptions and bind outcomes all collect in a
//! [`PassRecord`].
//!
//! # Design Decisions
//!
//! 1. The machine advances one step per tick so hosts can bound work per
//!    frame, abort between steps, and observe snapshot isolation.
//!
//! 2. User errors are values. [`EngineError`] only comes out of
//!    [`Evaluator::tick`] when an internal invariant breaks.

mod evaluator;
mod frame;
mod operators;
mod record;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use evaluator::Evaluator;
pub use record::{BindOutcome, PassRecord, Write};

use crate::ast::{Analysis, NodeId, Tree};
use crate::config::UnavailablePolicy;
use crate::error::EngineError;
use crate::reactive::{ReactionCache, StaleGraph};
use crate::steps::StepCache;
use crate::streams::Snapshot;
use crate::value::{Scope, Value};

/// How a pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Done(Value),
    /// The root value is an exception.
    Exception(Value),
    /// The step budget ran out.
    BudgetExceeded,
    /// Stopped at a step boundary on request; nothing is committed.
    Aborted,
}

impl Terminal {
    pub(crate) fn from_value(value: Value) -> Self {
        if value.is_exception() {
            Terminal::Exception(value)
        } else {
            Terminal::Done(value)
        }
    }

    /// The root value, for passes that produced one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Terminal::Done(value) | Terminal::Exception(value) => Some(value),
            Terminal::BudgetExceeded | Terminal::Aborted => None,
        }
    }
}

/// Everything a tick borrows from its owner.
pub struct EvalContext<'a> {
    pub tree: &'a Tree,
    pub analysis: &'a Analysis,
    pub steps: &'a mut StepCache,
    pub cache: &'a ReactionCache,
    pub staleness: &'a StaleGraph,
    /// Names visible to every program, outermost in the scope chain.
    pub globals: &'a Arc<Scope>,
}

/// Run a whole pass to its terminal state.
///
/// `abort` is checked before every step; setting it from another thread
/// ends the pass with [`Terminal::Aborted`].
pub fn run(
    ctx: &mut EvalContext<'_>,
    root: NodeId,
    snapshot: Arc<Snapshot>,
    budget: usize,
    unavailable: UnavailablePolicy,
    abort: Arc<AtomicBool>,
) -> Result<(Terminal, PassRecord), EngineError> {
    let mut evaluator = Evaluator::new(root, snapshot, budget, unavailable, abort);
    loop {
        if let Some(terminal) = evaluator.tick(ctx)? {
            return Ok((terminal, evaluator.into_record()));
        }
    }
}
