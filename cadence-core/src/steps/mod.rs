//! Execution Steps
//!
//! Every node compiles into a flat sequence of [`Step`]s that the evaluator
//! runs one at a time.
//!
//! # Overview
//!
//! A sequence only ever talks about its own node: children are reached by
//! index through [`Step::Evaluate`], which the evaluator turns into a new
//! frame (or a cached value). Stream reads are [`Step::Initialize`] steps that
//! name the stream instead of embedding its value, so a sequence can be
//! replayed against any pass snapshot.
//!
//! # Design Decisions
//!
//! 1. Jumps are absolute indices into the node's own sequence. Sequences are
//!    short and never spliced together, so there is nothing to relocate.
//!
//! 2. Problems found at generation time (missing children, blocking
//!    diagnostics) become a [`Operation::Fail`] step. Generation itself is
//!    infallible.

mod generator;

use std::sync::Arc;

pub use generator::{generate, StepCache};

use crate::ast::{BinaryOp, NodeId, UnaryOp};
use crate::value::{ExceptionKind, Value};

/// What a stream-reading step fetches from the pass snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// The stream's latest value.
    Latest,
    /// Whether the stream received events folded into this pass.
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamFetch {
    pub stream: Arc<str>,
    pub mode: FetchMode,
}

/// Operations consume operands from the frame's value stack and push one
/// result.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Binary(BinaryOp),
    Unary(UnaryOp),
    /// Resolve a name through the scope chain, then globals.
    Lookup(Arc<str>),
    Property(Arc<str>),
    MakeList(usize),
    MakeStructure(Arc<[String]>),
    MakeFunction {
        function: NodeId,
        body: NodeId,
        parameters: Arc<[String]>,
    },
    /// Callee and this many arguments are on the stack.
    Call(usize),
    /// The reaction's last committed value.
    Previous(NodeId),
    Fail {
        kind: ExceptionKind,
        message: Arc<str>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Push(Value),
    /// Evaluate the child at this index and push its value.
    Evaluate(usize),
    Apply(Operation),
    Initialize(StreamFetch),
    /// Bind the top of the stack in the frame's scope, leaving it in place.
    Define(Arc<str>),
    Discard,
    /// Give the frame a fresh child scope.
    EnterScope,
    Jump(usize),
    /// Pop a boolean; jump when it is false.
    JumpIfFalse(usize),
    /// Jump when the frame's reaction already has a committed value.
    JumpIfInitialized(usize),
    /// Complete the node with the top of the stack.
    Finish,
}
