//! Step generation.
//!
//! [`generate`] is a pure function of node structure: it never reads a
//! stream, never looks at values, and always returns a runnable sequence.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::{FetchMode, Operation, Step, StreamFetch};
use crate::ast::{enclosing_reaction, NodeId, NodeKind, Tree};
use crate::value::{ExceptionKind, Value};

/// Compile one node into its step sequence.
pub fn generate(tree: &Tree, id: NodeId) -> Arc<[Step]> {
    let node = tree.node(id);
    if let Some(diagnostic) = node.diagnostic().filter(|d| d.is_blocking()) {
        return fail(ExceptionKind::CompileTimeConflict, &diagnostic.message);
    }

    let arity = node.children().len();
    if let Some(message) = arity_problem(node.kind(), arity) {
        return fail(ExceptionKind::IncompleteExpression, &message);
    }

    let steps: Vec<Step> = match node.kind() {
        NodeKind::Program | NodeKind::Bind { .. } => vec![Step::Evaluate(0), Step::Finish],
        NodeKind::Block => block(tree, node.children()),
        NodeKind::Number { amount, unit } => {
            let value = match unit {
                Some(unit) => Value::measure(*amount, unit),
                None => Value::number(*amount),
            };
            vec![Step::Push(value), Step::Finish]
        }
        NodeKind::Text { text } => vec![Step::Push(Value::text(text)), Step::Finish],
        NodeKind::Boolean { value } => vec![Step::Push(Value::Boolean(*value)), Step::Finish],
        NodeKind::List => collect(arity, Operation::MakeList(arity)),
        NodeKind::Structure { fields } => {
            collect(arity, Operation::MakeStructure(fields.iter().cloned().collect()))
        }
        NodeKind::Property { name } => vec![
            Step::Evaluate(0),
            Step::Apply(Operation::Property(name.as_str().into())),
            Step::Finish,
        ],
        NodeKind::Reference { name } => vec![
            Step::Apply(Operation::Lookup(name.as_str().into())),
            Step::Finish,
        ],
        NodeKind::Binary { operators } => {
            // Strictly left to right: ((a op b) op c) ...
            let mut steps = vec![Step::Evaluate(0)];
            for (index, operator) in operators.iter().enumerate() {
                steps.push(Step::Evaluate(index + 1));
                steps.push(Step::Apply(Operation::Binary(*operator)));
            }
            steps.push(Step::Finish);
            steps
        }
        NodeKind::Unary { operator } => vec![
            Step::Evaluate(0),
            Step::Apply(Operation::Unary(*operator)),
            Step::Finish,
        ],
        NodeKind::Conditional => vec![
            Step::Evaluate(0),
            Step::JumpIfFalse(4),
            Step::Evaluate(1),
            Step::Jump(5),
            Step::Evaluate(2),
            Step::Finish,
        ],
        NodeKind::Function { parameters } => vec![
            Step::Apply(Operation::MakeFunction {
                function: id,
                body: node.children()[0],
                parameters: parameters.iter().cloned().collect(),
            }),
            Step::Finish,
        ],
        NodeKind::Call => {
            let mut steps: Vec<Step> = (0..arity).map(Step::Evaluate).collect();
            steps.push(Step::Apply(Operation::Call(arity - 1)));
            steps.push(Step::Finish);
            steps
        }
        NodeKind::Stream { name } => vec![fetch(name, FetchMode::Latest), Step::Finish],
        NodeKind::Changed { stream } => vec![fetch(stream, FetchMode::Changed), Step::Finish],
        NodeKind::Reaction if arity == 2 => vec![
            Step::JumpIfInitialized(3),
            Step::Evaluate(0),
            Step::Jump(4),
            Step::Evaluate(1),
            Step::Finish,
        ],
        NodeKind::Reaction => vec![
            Step::JumpIfInitialized(3),
            Step::Evaluate(0),
            Step::Jump(8),
            Step::Evaluate(1),
            Step::JumpIfFalse(7),
            Step::Evaluate(2),
            Step::Jump(8),
            Step::Apply(Operation::Previous(id)),
            Step::Finish,
        ],
        NodeKind::Previous => match enclosing_reaction(tree, id) {
            Some(reaction) => vec![Step::Apply(Operation::Previous(reaction)), Step::Finish],
            None => {
                return fail(
                    ExceptionKind::IncompleteExpression,
                    "`.` can only be used inside a reaction",
                )
            }
        },
        NodeKind::Placeholder => {
            return fail(ExceptionKind::IncompleteExpression, "placeholder needs an expression")
        }
    };

    steps.into()
}

fn block(tree: &Tree, statements: &[NodeId]) -> Vec<Step> {
    let mut steps = vec![Step::EnterScope];
    for (index, &statement) in statements.iter().enumerate() {
        steps.push(Step::Evaluate(index));
        if let NodeKind::Bind { name } = tree.kind(statement) {
            steps.push(Step::Define(name.as_str().into()));
        }
        if index + 1 < statements.len() {
            steps.push(Step::Discard);
        }
    }
    steps.push(Step::Finish);
    steps
}

fn collect(arity: usize, operation: Operation) -> Vec<Step> {
    let mut steps: Vec<Step> = (0..arity).map(Step::Evaluate).collect();
    steps.push(Step::Apply(operation));
    steps.push(Step::Finish);
    steps
}

fn fetch(stream: &str, mode: FetchMode) -> Step {
    Step::Initialize(StreamFetch {
        stream: stream.into(),
        mode,
    })
}

fn fail(kind: ExceptionKind, message: &str) -> Arc<[Step]> {
    Arc::from(vec![
        Step::Apply(Operation::Fail {
            kind,
            message: message.into(),
        }),
        Step::Finish,
    ])
}

fn arity_problem(kind: &NodeKind, arity: usize) -> Option<String> {
    let expected = match kind {
        NodeKind::Program
        | NodeKind::Bind { .. }
        | NodeKind::Property { .. }
        | NodeKind::Unary { .. }
        | NodeKind::Function { .. } => arity == 1,
        NodeKind::Block | NodeKind::Call => arity >= 1,
        NodeKind::List => true,
        NodeKind::Structure { fields } => arity == fields.len(),
        NodeKind::Binary { operators } => !operators.is_empty() && arity == operators.len() + 1,
        NodeKind::Conditional => arity == 3,
        NodeKind::Reaction => arity == 2 || arity == 3,
        NodeKind::Number { .. }
        | NodeKind::Text { .. }
        | NodeKind::Boolean { .. }
        | NodeKind::Reference { .. }
        | NodeKind::Stream { .. }
        | NodeKind::Changed { .. }
        | NodeKind::Previous
        | NodeKind::Placeholder => arity == 0,
    };
    (!expected).then(|| format!("{} has {arity} parts", kind.name()))
}

/// Generated sequences for one tree, built lazily.
///
/// Keyed by node id, so the cache empties itself whenever it is used with a
/// different tree revision.
#[derive(Debug, Default)]
pub struct StepCache {
    revision: u64,
    sequences: HashMap<NodeId, Arc<[Step]>>,
}

impl StepCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, tree: &Tree, id: NodeId) -> Arc<[Step]> {
        if self.revision != tree.revision() {
            self.sequences.clear();
            self.revision = tree.revision();
        }
        Arc::clone(self.sequences.entry(id).or_insert_with(|| {
            trace!(node = %id, "generating steps");
            generate(tree, id)
        }))
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn clear(&mut self) {
        self.sequences.clear();
    }
}
