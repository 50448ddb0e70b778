//! The stack machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::frame::Frame;
use super::operators;
use super::record::{BindOutcome, PassRecord, Write};
use super::{EvalContext, Terminal};
use crate::ast::{NodeId, NodeKind};
use crate::config::UnavailablePolicy;
use crate::error::EngineError;
use crate::reactive::DirtyState;
use crate::steps::{FetchMode, Operation, Step, StreamFetch};
use crate::streams::Snapshot;
use crate::value::{Closure, ExceptionKind, Scope, Value};

/// Runs one pass, one step per [`tick`](Evaluator::tick).
///
/// The evaluator owns its frames and the pass record but borrows the tree,
/// caches and staleness through an [`EvalContext`] on every tick, so the
/// host can interleave ticks with other work (including queueing events,
/// which this pass will not see).
#[derive(Debug)]
pub struct Evaluator {
    root: NodeId,
    snapshot: Arc<Snapshot>,
    budget: usize,
    unavailable: UnavailablePolicy,
    abort: Arc<AtomicBool>,
    frames: Vec<Frame>,
    record: PassRecord,
    started: bool,
    terminal: Option<Terminal>,
}

impl Evaluator {
    pub fn new(
        root: NodeId,
        snapshot: Arc<Snapshot>,
        budget: usize,
        unavailable: UnavailablePolicy,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            root,
            snapshot,
            budget,
            unavailable,
            abort,
            frames: Vec::new(),
            record: PassRecord::default(),
            started: false,
            terminal: None,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn record(&self) -> &PassRecord {
        &self.record
    }

    pub fn into_record(self) -> PassRecord {
        self.record
    }

    pub(crate) fn take_record(&mut self) -> PassRecord {
        std::mem::take(&mut self.record)
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    /// Number of frames currently on the stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Run at most one step.
    ///
    /// Returns the terminal state once the pass has reached one; further
    /// calls keep returning it.
    pub fn tick(&mut self, ctx: &mut EvalContext<'_>) -> Result<Option<Terminal>, EngineError> {
        if let Some(terminal) = &self.terminal {
            return Ok(Some(terminal.clone()));
        }
        if self.abort.load(Ordering::Acquire) {
            self.frames.clear();
            return Ok(Some(self.finish(Terminal::Aborted)));
        }
        if !self.started {
            self.started = true;
            let scope = Scope::child(ctx.globals);
            if let Some(value) = self.enter(ctx, self.root, scope) {
                return Ok(Some(self.finish(Terminal::from_value(value))));
            }
            return Ok(None);
        }
        if self.record.steps >= self.budget {
            self.frames.clear();
            return Ok(Some(self.finish(Terminal::BudgetExceeded)));
        }

        self.record.steps += 1;
        self.step(ctx)
    }

    fn finish(&mut self, terminal: Terminal) -> Terminal {
        self.terminal = Some(terminal.clone());
        terminal
    }

    fn top(&mut self) -> Result<&mut Frame, EngineError> {
        self.frames
            .last_mut()
            .ok_or_else(|| EngineError::invariant("no frame to run"))
    }

    fn step(&mut self, ctx: &mut EvalContext<'_>) -> Result<Option<Terminal>, EngineError> {
        let step = self.top()?.advance()?;
        match step {
            Step::Push(value) => self.top()?.push(value),
            Step::Evaluate(index) => {
                let frame = self.top()?;
                let child = ctx
                    .tree
                    .children(frame.node)
                    .get(index)
                    .copied()
                    .ok_or_else(|| {
                        EngineError::invariant(format!("node {} has no child {index}", frame.node))
                    })?;
                let scope = Arc::clone(&frame.scope);
                if let Some(value) = self.enter(ctx, child, scope) {
                    self.top()?.push(value);
                }
            }
            Step::Apply(operation) => self.apply(ctx, operation)?,
            Step::Initialize(fetch) => self.initialize(fetch)?,
            Step::Define(name) => {
                let frame = self.top()?;
                let value = frame.peek()?.clone();
                frame.scope.define(&name, value);
            }
            Step::Discard => {
                self.top()?.pop()?;
            }
            Step::EnterScope => {
                let frame = self.top()?;
                frame.scope = Scope::child(&frame.scope);
            }
            Step::Jump(target) => self.top()?.cursor = target,
            Step::JumpIfFalse(target) => {
                let frame = self.top()?;
                match frame.pop()? {
                    Value::Boolean(true) => {}
                    Value::Boolean(false) => frame.cursor = target,
                    exception @ Value::Exception(_) => frame.complete_with(exception),
                    other => {
                        let node = frame.node;
                        frame.complete_with(operators::mismatch(
                            node,
                            format!("expected a boolean condition, got {}", other.type_name()),
                        ));
                    }
                }
            }
            Step::JumpIfInitialized(target) => {
                let frame = self.top()?;
                if ctx.cache.contains(frame.node) {
                    frame.cursor = target;
                }
            }
            Step::Finish => return self.complete(ctx),
        }
        Ok(None)
    }

    /// Start evaluating `node`, or return its cached value.
    fn enter(&mut self, ctx: &mut EvalContext<'_>, node: NodeId, scope: Arc<Scope>) -> Option<Value> {
        if let Some(value) = self.reuse(ctx, node) {
            self.record.reused += 1;
            return Some(value);
        }
        let steps = ctx.steps.get(ctx.tree, node);
        self.record.count_evaluation(node);
        self.frames.push(Frame::new(node, steps, scope));
        None
    }

    fn reuse(&mut self, ctx: &EvalContext<'_>, node: NodeId) -> Option<Value> {
        if ctx.analysis.is_volatile(node) {
            return None;
        }
        let cached = ctx.cache.reusable(node)?;
        let current = if matches!(ctx.tree.kind(node), NodeKind::Reaction) {
            // A committed reaction is initialized; `initial` never runs again.
            ctx.tree
                .children(node)
                .iter()
                .skip(1)
                .all(|&child| self.unaffected(ctx, child))
        } else {
            self.unaffected(ctx, node)
        };
        if !current {
            return None;
        }
        if !ctx.staleness.is_clean(node) {
            self.record.cleaned.push(node);
        }
        trace!(%node, "reusing cached value");
        if ctx.tree.kind(node).is_bind() {
            self.record.bind_outcomes.insert(node, BindOutcome::Unchanged);
        }
        Some(cached.clone())
    }

    /// Whether nothing `node` reads has changed since its last commit.
    fn unaffected(&self, ctx: &EvalContext<'_>, node: NodeId) -> bool {
        match ctx.staleness.state(node) {
            DirtyState::Clean => true,
            DirtyState::Dirty => false,
            DirtyState::MaybeDirty => {
                let changed = ctx
                    .analysis
                    .dependencies(node)
                    .iter()
                    .find(|&&bind| self.bind_changed(ctx, bind));
                if let Some(bind) = changed {
                    trace!(%node, %bind, "dependency changed, re-evaluating");
                    return false;
                }
                true
            }
        }
    }

    fn bind_changed(&self, ctx: &EvalContext<'_>, bind: NodeId) -> bool {
        match self.record.bind_outcome(bind) {
            Some(outcome) => outcome == BindOutcome::Changed,
            None => !ctx.staleness.is_clean(bind) || ctx.cache.reusable(bind).is_none(),
        }
    }

    fn complete(&mut self, ctx: &mut EvalContext<'_>) -> Result<Option<Terminal>, EngineError> {
        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| EngineError::invariant("completed a missing frame"))?;
        let value = frame.pop()?;
        let node = frame.node;
        let kind = ctx.tree.kind(node);

        if kind.is_bind() {
            let outcome = if ctx.cache.value(node) == Some(&value) {
                BindOutcome::Unchanged
            } else {
                BindOutcome::Changed
            };
            self.record.bind_outcomes.insert(node, outcome);
        }
        self.record.writes.insert(
            node,
            Write {
                value: value.clone(),
                reusable: !ctx.analysis.is_volatile(node),
                reaction: matches!(kind, NodeKind::Reaction),
                stream_version: frame.stream_version,
            },
        );

        match self.frames.last_mut() {
            Some(parent) => {
                parent.observe_version(frame.stream_version);
                parent.push(value);
                Ok(None)
            }
            None => Ok(Some(self.finish(Terminal::from_value(value)))),
        }
    }

    fn apply(&mut self, ctx: &mut EvalContext<'_>, operation: Operation) -> Result<(), EngineError> {
        let frame = self.top()?;
        let node = frame.node;
        let value = match operation {
            Operation::Binary(operator) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                operators::binary(operator, &left, &right, node)
            }
            Operation::Unary(operator) => {
                let operand = frame.pop()?;
                operators::unary(operator, &operand, node)
            }
            Operation::Lookup(name) => frame.scope.lookup(&name).unwrap_or_else(|| {
                Value::exception(
                    ExceptionKind::UnknownName,
                    format!("`{name}` is not defined"),
                    Some(node),
                )
            }),
            Operation::Property(name) => {
                let subject = frame.pop()?;
                operators::property(&subject, &name, node)
            }
            Operation::MakeList(count) => Value::list(frame.pop_many(count)?),
            Operation::MakeStructure(fields) => {
                let values = frame.pop_many(fields.len())?;
                Value::Structure(Arc::new(fields.iter().cloned().zip(values).collect()))
            }
            Operation::MakeFunction {
                function,
                body,
                parameters,
            } => Value::Function(Closure::new(
                function,
                body,
                parameters,
                Arc::clone(&frame.scope),
            )),
            Operation::Call(argc) => {
                let arguments = frame.pop_many(argc)?;
                let callee = frame.pop()?;
                match self.call(ctx, node, callee, arguments)? {
                    Some(value) => value,
                    // The body frame pushes the result when it finishes.
                    None => return Ok(()),
                }
            }
            Operation::Previous(reaction) => ctx.cache.value(reaction).cloned().unwrap_or_else(|| {
                Value::exception(
                    ExceptionKind::IncompleteExpression,
                    "reaction has no previous value yet",
                    Some(node),
                )
            }),
            Operation::Fail { kind, message } => Value::exception(kind, &*message, Some(node)),
        };
        self.top()?.push(value);
        Ok(())
    }

    /// Push a frame for the callee's body, or return the call's value when
    /// there is nothing to run.
    fn call(
        &mut self,
        ctx: &mut EvalContext<'_>,
        node: NodeId,
        callee: Value,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, EngineError> {
        let closure = match callee {
            Value::Function(closure) => closure,
            exception @ Value::Exception(_) => return Ok(Some(exception)),
            other => {
                return Ok(Some(operators::mismatch(
                    node,
                    format!("cannot call {}", other.type_name()),
                )))
            }
        };
        if closure.parameters().len() != arguments.len() {
            return Ok(Some(operators::mismatch(
                node,
                format!(
                    "function expects {} inputs, got {}",
                    closure.parameters().len(),
                    arguments.len()
                ),
            )));
        }

        let env = closure
            .env()
            .ok_or_else(|| EngineError::invariant(format!("scope of function {} was dropped", closure.function())))?;
        let scope = Scope::child(&env);
        for (parameter, argument) in closure.parameters().iter().zip(arguments) {
            scope.define(parameter, argument);
        }

        let body = closure.body();
        let steps = ctx.steps.get(ctx.tree, body);
        self.record.count_evaluation(body);
        self.frames.push(Frame::new(body, steps, scope));
        Ok(None)
    }

    fn initialize(&mut self, fetch: StreamFetch) -> Result<(), EngineError> {
        let unavailable = self.unavailable;
        let snapshot = Arc::clone(&self.snapshot);
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| EngineError::invariant("no frame to run"))?;
        let node = frame.node;

        let Some(entry) = snapshot.get(&fetch.stream) else {
            frame.push(Value::exception(
                ExceptionKind::UnknownName,
                format!("there is no stream called `{}`", fetch.stream),
                Some(node),
            ));
            return Ok(());
        };
        self.record
            .subscriptions
            .insert((Arc::clone(&fetch.stream), node));
        frame.observe_version(Some(entry.version));

        let value = match fetch.mode {
            FetchMode::Changed => {
                if entry.changed {
                    self.record.edge_triggered.insert(node);
                }
                Value::Boolean(entry.changed)
            }
            FetchMode::Latest => {
                if entry.on_demand {
                    self.record.demands.insert(Arc::clone(&fetch.stream));
                }
                if entry.degraded {
                    self.record.degraded.insert(Arc::clone(&fetch.stream));
                    match unavailable {
                        UnavailablePolicy::Degrade => entry.value.clone(),
                        UnavailablePolicy::Exception => Value::exception(
                            ExceptionKind::StreamUnavailable,
                            format!("stream `{}` is unavailable", fetch.stream),
                            Some(node),
                        ),
                    }
                } else {
                    entry.value.clone()
                }
            }
        };
        frame.push(value);
        Ok(())
    }
}
