//! Activation records.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::ast::NodeId;
use crate::error::EngineError;
use crate::steps::Step;
use crate::value::{Scope, Value};

/// One node evaluation in progress.
#[derive(Debug)]
pub(crate) struct Frame {
    pub node: NodeId,
    pub steps: Arc<[Step]>,
    pub cursor: usize,
    pub values: SmallVec<[Value; 4]>,
    pub scope: Arc<Scope>,
    /// Newest stream version read by this node or anything below it.
    pub stream_version: Option<u64>,
}

impl Frame {
    pub fn new(node: NodeId, steps: Arc<[Step]>, scope: Arc<Scope>) -> Self {
        Self {
            node,
            steps,
            cursor: 0,
            values: SmallVec::new(),
            scope,
            stream_version: None,
        }
    }

    /// The next step to run, advancing the cursor past it.
    pub fn advance(&mut self) -> Result<Step, EngineError> {
        let step = self.steps.get(self.cursor).cloned().ok_or_else(|| {
            EngineError::invariant(format!("node {} ran past its last step", self.node))
        })?;
        self.cursor += 1;
        Ok(step)
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, EngineError> {
        self.values
            .pop()
            .ok_or_else(|| EngineError::invariant(format!("value stack of node {} is empty", self.node)))
    }

    pub fn peek(&self) -> Result<&Value, EngineError> {
        self.values
            .last()
            .ok_or_else(|| EngineError::invariant(format!("value stack of node {} is empty", self.node)))
    }

    /// Remove the top `count` values, oldest first.
    pub fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, EngineError> {
        let len = self.values.len();
        if count > len {
            return Err(EngineError::invariant(format!(
                "node {} needs {count} values but has {len}",
                self.node
            )));
        }
        Ok(self.values.drain(len - count..).collect())
    }

    /// Make `value` the node's result and jump to its final step.
    pub fn complete_with(&mut self, value: Value) {
        self.values.clear();
        self.values.push(value);
        self.cursor = self.steps.len().saturating_sub(1);
    }

    pub fn observe_version(&mut self, version: Option<u64>) {
        self.stream_version = self.stream_version.max(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        let steps: Arc<[Step]> = Arc::from(vec![Step::Discard, Step::Finish]);
        Frame::new(NodeId::from(0), steps, Scope::root())
    }

    #[test]
    fn pop_many_keeps_order() {
        let mut frame = frame();
        for n in 1..=3 {
            frame.push(Value::number(n as f64));
        }
        let popped = frame.pop_many(2).unwrap();
        assert_eq!(popped, vec![Value::number(2.0), Value::number(3.0)]);
        assert_eq!(frame.values.len(), 1);
        assert!(frame.pop_many(2).is_err());
    }

    #[test]
    fn complete_with_jumps_to_finish() {
        let mut frame = frame();
        frame.push(Value::number(1.0));
        frame.complete_with(Value::Boolean(false));
        assert_eq!(frame.advance().unwrap(), Step::Finish);
        assert_eq!(frame.pop().unwrap(), Value::Boolean(false));
        assert!(frame.advance().is_err());
    }

    #[test]
    fn newest_version_wins() {
        let mut frame = frame();
        frame.observe_version(Some(3));
        frame.observe_version(None);
        frame.observe_version(Some(2));
        assert_eq!(frame.stream_version, Some(3));
    }
}
