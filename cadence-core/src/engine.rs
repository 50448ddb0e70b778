//! Engine
//!
//! The host-facing entry point. An [`Engine`] owns one program tree together
//! with its streams, caches and listeners, and runs passes over it.
//!
//! # Passes
//!
//! [`Engine::evaluate`] runs a whole pass. [`Engine::start_pass`] hands out
//! a [`Pass`] that the host ticks step by step instead; at most one pass
//! exists at a time because it borrows the engine mutably.
//!
//! How a pass ends decides what is committed:
//!
//! | terminal | root value | cache, staleness, observed versions |
//! |----------|------------|--------------------------------------|
//! | done / exception | committed | committed |
//! | budget exceeded | NonTermination exception | untouched |
//! | aborted | nothing | untouched |
//!
//! Listeners hear about every pass that produced a root value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ast::{Analysis, NodeId, Tree};
use crate::config::{ConflictPolicy, EngineConfig};
use crate::error::EngineError;
use crate::eval::{EvalContext, Evaluator, PassRecord, Terminal};
use crate::reactive::{Listener, ListenerId, Listeners, Scheduler};
use crate::steps::StepCache;
use crate::streams::{EventLog, EventSender, Snapshot, StreamCatalog};
use crate::value::{ExceptionKind, Scope, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassOutcome {
    #[default]
    Done,
    Exception,
    BudgetExceeded,
    Aborted,
}

/// Summary of one finished pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub pass: u64,
    pub outcome: PassOutcome,
    /// The root value, absent for aborted passes.
    pub value: Option<Value>,
    pub steps: usize,
    /// Nodes whose steps ran.
    pub evaluated: usize,
    /// Nodes answered from the cache.
    pub reused: usize,
    /// Unavailable streams the pass read.
    pub degraded: Vec<String>,
    /// On-demand streams the pass read.
    pub demands: Vec<String>,
}

/// Requests that the running pass stop at its next step boundary.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct Engine {
    tree: Arc<Tree>,
    analysis: Analysis,
    steps: StepCache,
    scheduler: Scheduler,
    globals: Arc<Scope>,
    config: EngineConfig,
    catalog: Arc<StreamCatalog>,
    listeners: Listeners,
    abort: Arc<AtomicBool>,
    latest: Option<Value>,
    last_report: Option<PassReport>,
    evaluations: HashMap<NodeId, usize>,
    stopped: bool,
}

impl Engine {
    pub fn new(tree: Tree, catalog: StreamCatalog, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::build(tree, catalog, config))
    }

    /// Built-in streams and default configuration.
    pub fn with_defaults(tree: Tree) -> Self {
        Self::build(tree, StreamCatalog::builtin(), EngineConfig::default())
    }

    fn build(tree: Tree, catalog: StreamCatalog, config: EngineConfig) -> Self {
        let catalog = Arc::new(catalog);
        let analysis = Analysis::new(&tree);
        let mut scheduler = Scheduler::new(Arc::clone(&catalog), &config);
        scheduler.subscribe_readers(&analysis);
        info!(nodes = tree.len(), streams = catalog.len(), "engine loaded");
        Self {
            tree: Arc::new(tree),
            analysis,
            steps: StepCache::new(),
            scheduler,
            globals: Scope::root(),
            config,
            catalog,
            listeners: Listeners::default(),
            abort: Arc::default(),
            latest: None,
            last_report: None,
            evaluations: HashMap::new(),
            stopped: false,
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<StreamCatalog> {
        &self.catalog
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Run one pass to completion and return its root value.
    pub fn evaluate(&mut self) -> Result<Value, EngineError> {
        self.start_pass()?.run()
    }

    /// Open a pass to be driven one step at a time.
    pub fn start_pass(&mut self) -> Result<Pass<'_>, EngineError> {
        if self.stopped {
            return Err(EngineError::Stopped);
        }
        if self.config.conflict_policy == ConflictPolicy::Refuse {
            if let Some(&node) = self.analysis.blocking().first() {
                let message = self
                    .tree
                    .node(node)
                    .diagnostic()
                    .map(|diagnostic| diagnostic.message.clone())
                    .unwrap_or_default();
                return Err(EngineError::BlockingConflict { node, message });
            }
        }

        self.abort.store(false, Ordering::Release);
        let snapshot = self.scheduler.begin_pass(&self.tree, &self.analysis);
        let evaluator = Evaluator::new(
            self.tree.root(),
            snapshot,
            self.config.step_budget,
            self.config.unavailable_policy,
            Arc::clone(&self.abort),
        );
        Ok(Pass {
            engine: self,
            evaluator,
            finished: false,
        })
    }

    /// Root value of the last pass that produced one.
    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    /// Last committed value of any node.
    pub fn latest_value(&self, node: NodeId) -> Option<&Value> {
        self.scheduler.cache().value(node)
    }

    /// Queue an event for the next pass.
    pub fn add_stream_event(&self, stream: &str, value: impl Into<Value>) -> Result<(), EngineError> {
        if self.stopped {
            return Err(EngineError::Stopped);
        }
        self.scheduler.sender().send(stream, value.into())
    }

    /// A thread-safe handle for queueing events.
    pub fn event_sender(&self) -> EventSender {
        self.scheduler.sender()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    /// Discard queued events, unsubscribe all readers and refuse new passes.
    pub fn stop(&mut self) {
        if !self.stopped {
            info!("engine stopped");
        }
        self.stopped = true;
        self.scheduler.stop();
    }

    pub fn on_commit<F>(&mut self, notify: F) -> ListenerId
    where
        F: FnMut(&PassReport) + Send + 'static,
    {
        self.listeners.add(Listener::new(notify))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Swap in an edited tree. Every cache tied to the old tree is dropped.
    pub fn replace_tree(&mut self, tree: Tree) {
        self.analysis = Analysis::new(&tree);
        self.tree = Arc::new(tree);
        self.steps.clear();
        self.evaluations.clear();
        self.reset_caches();
        debug!(revision = self.tree.revision(), "tree replaced");
    }

    /// Make `name` visible to the program unless it binds the name itself.
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.define(name, value);
        self.reset_caches();
    }

    fn reset_caches(&mut self) {
        self.scheduler.invalidate();
        if !self.stopped {
            self.scheduler.subscribe_readers(&self.analysis);
        }
    }

    pub fn set_stream_available(&mut self, stream: &str, available: bool) -> Result<(), EngineError> {
        self.scheduler
            .set_available(&self.tree, &self.analysis, stream, available)
    }

    /// How many times `node` ran its steps since the tree was loaded.
    pub fn evaluation_count(&self, node: NodeId) -> usize {
        self.evaluations.get(&node).copied().unwrap_or(0)
    }

    pub fn last_report(&self) -> Option<&PassReport> {
        self.last_report.as_ref()
    }

    pub fn event_log(&self) -> EventLog {
        self.scheduler.registry().event_log()
    }

    fn count_evaluations(&mut self, record: &PassRecord) {
        for (&node, &count) in &record.evaluations {
            *self.evaluations.entry(node).or_default() += count;
        }
    }
}

/// One pass in progress.
///
/// Dropping an unfinished pass discards it like an abort.
#[derive(Debug)]
pub struct Pass<'e> {
    engine: &'e mut Engine,
    evaluator: Evaluator,
    finished: bool,
}

impl Pass<'_> {
    /// Run at most one step; returns the terminal state once reached.
    ///
    /// A pass abandoned after an error keeps returning
    /// [`EngineError::Aborted`].
    pub fn tick(&mut self) -> Result<Option<Terminal>, EngineError> {
        if self.finished {
            return match self.evaluator.terminal() {
                Some(terminal) => Ok(Some(terminal.clone())),
                None => Err(EngineError::Aborted),
            };
        }
        let engine = &mut *self.engine;
        let mut ctx = EvalContext {
            tree: &engine.tree,
            analysis: &engine.analysis,
            steps: &mut engine.steps,
            cache: engine.scheduler.cache(),
            staleness: engine.scheduler.staleness(),
            globals: &engine.globals,
        };
        match self.evaluator.tick(&mut ctx) {
            Ok(Some(terminal)) => {
                self.conclude(&terminal);
                Ok(Some(terminal))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                warn!(%error, "pass failed");
                self.abandon();
                Err(error)
            }
        }
    }

    /// Tick until the pass ends and return the root value.
    pub fn run(mut self) -> Result<Value, EngineError> {
        loop {
            match self.tick()? {
                None => continue,
                Some(Terminal::Aborted) => return Err(EngineError::Aborted),
                Some(_) => {
                    return self
                        .engine
                        .latest
                        .clone()
                        .ok_or_else(|| EngineError::invariant("pass ended without a value"))
                }
            }
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.evaluator.snapshot()
    }

    pub fn steps(&self) -> usize {
        self.evaluator.record().steps
    }

    /// Frames on the evaluator's stack.
    pub fn depth(&self) -> usize {
        self.evaluator.depth()
    }

    fn conclude(&mut self, terminal: &Terminal) {
        self.finished = true;
        let record = self.evaluator.take_record();
        let snapshot = Arc::clone(self.evaluator.snapshot());
        let engine = &mut *self.engine;
        engine.count_evaluations(&record);

        let (outcome, value) = match terminal {
            Terminal::Done(value) => (PassOutcome::Done, Some(value.clone())),
            Terminal::Exception(value) => (PassOutcome::Exception, Some(value.clone())),
            Terminal::BudgetExceeded => {
                let value = Value::exception(
                    ExceptionKind::NonTermination,
                    format!("gave up after {} steps", engine.config.step_budget),
                    Some(engine.tree.root()),
                );
                (PassOutcome::BudgetExceeded, Some(value))
            }
            Terminal::Aborted => (PassOutcome::Aborted, None),
        };
        match outcome {
            PassOutcome::Done | PassOutcome::Exception => {
                engine.scheduler.commit(&engine.tree, &snapshot, &record)
            }
            PassOutcome::BudgetExceeded | PassOutcome::Aborted => engine.scheduler.discard(&record),
        }

        let report = PassReport {
            pass: snapshot.pass(),
            outcome,
            value,
            steps: record.steps,
            evaluated: record.evaluated,
            reused: record.reused,
            degraded: record.degraded.iter().map(|s| s.to_string()).collect(),
            demands: record.demands.iter().map(|s| s.to_string()).collect(),
        };
        debug!(
            pass = report.pass,
            outcome = ?report.outcome,
            steps = report.steps,
            evaluated = report.evaluated,
            reused = report.reused,
            "pass finished"
        );
        for stream in &report.degraded {
            warn!(%stream, "pass read an unavailable stream");
        }

        if let Some(value) = &report.value {
            engine.latest = Some(value.clone());
            engine.listeners.notify(&report);
        }
        engine.last_report = Some(report);
    }

    fn abandon(&mut self) {
        self.finished = true;
        let record = self.evaluator.take_record();
        self.engine.count_evaluations(&record);
        self.engine.scheduler.discard(&record);
    }
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("unfinished pass dropped");
            self.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Diagnostic, TreeBuilder};

    fn time_check() -> Tree {
        let mut b = TreeBuilder::new();
        let time = b.stream("time");
        let zero = b.measure(0.0, "ms");
        let check = b.binary(time, BinaryOp::Greater, zero);
        b.finish(check).unwrap()
    }

    #[test]
    fn evaluate_commits_root_value() {
        let mut engine = Engine::with_defaults(time_check());
        assert_eq!(engine.evaluate().unwrap(), Value::Boolean(false));
        assert_eq!(engine.latest(), Some(&Value::Boolean(false)));
        let report = engine.last_report().unwrap();
        assert_eq!(report.outcome, PassOutcome::Done);
        assert_eq!(report.pass, 1);
    }

    #[test]
    fn stopped_engine_refuses_work() {
        let mut engine = Engine::with_defaults(time_check());
        engine.stop();
        assert!(matches!(engine.evaluate(), Err(EngineError::Stopped)));
        assert!(matches!(
            engine.add_stream_event("time", 1.0),
            Err(EngineError::Stopped)
        ));
    }

    #[test]
    fn refuse_policy_reports_the_blocked_node() {
        let mut b = TreeBuilder::new();
        let one = b.number(1.0);
        b.diagnose(one, Diagnostic::blocking("not allowed"));
        let tree = b.finish(one).unwrap();
        let config = EngineConfig::default().with_conflict_policy(ConflictPolicy::Refuse);
        let mut engine = Engine::new(tree, StreamCatalog::builtin(), config).unwrap();

        match engine.evaluate() {
            Err(EngineError::BlockingConflict { node, message }) => {
                assert_eq!(node, one);
                assert_eq!(message, "not allowed");
            }
            other => panic!("expected a blocking conflict, got {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig::default().with_step_budget(0);
        assert!(matches!(
            Engine::new(time_check(), StreamCatalog::builtin(), config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn dropped_pass_commits_nothing() {
        let mut engine = Engine::with_defaults(time_check());
        {
            let mut pass = engine.start_pass().unwrap();
            pass.tick().unwrap();
        }
        assert!(engine.latest().is_none());
        assert!(engine.scheduler().cache().is_empty());
        assert_eq!(engine.evaluate().unwrap(), Value::Boolean(false));
    }

    #[test]
    fn abandoned_pass_stays_abandoned() {
        let mut engine = Engine::with_defaults(time_check());
        let mut pass = engine.start_pass().unwrap();
        pass.tick().unwrap();
        pass.abandon();

        for _ in 0..3 {
            assert!(matches!(pass.tick(), Err(EngineError::Aborted)));
        }
        assert!(matches!(pass.run(), Err(EngineError::Aborted)));
        assert!(engine.latest().is_none());
    }

    #[test]
    fn finished_pass_repeats_its_terminal() {
        let mut engine = Engine::with_defaults(time_check());
        let mut pass = engine.start_pass().unwrap();
        let terminal = loop {
            if let Some(terminal) = pass.tick().unwrap() {
                break terminal;
            }
        };
        assert_eq!(pass.tick().unwrap(), Some(terminal));
    }
}
