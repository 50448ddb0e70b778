//! Stream Implementation
//!
//! A [`Stream`] is one named external source with a versioned history of
//! the values it emitted.
//!
//! # How Streams Work
//!
//! 1. Every recorded event is checked against the catalog contract, then
//!    appended to the history under the next version.
//!
//! 2. The latest value is the newest history entry, or the catalog default
//!    while nothing has been recorded yet.
//!
//! 3. History is bounded; old entries drop off the front while versions keep
//!    counting up.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::catalog::{Emission, StreamSpec};
use crate::error::EngineError;
use crate::value::Value;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Per-stream version, starting at 1.
    pub version: u64,
    /// Position among all events recorded by the registry.
    pub sequence: u64,
    /// The value exactly as it was pushed.
    pub input: Value,
    /// The value programs observe.
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct Stream {
    spec: StreamSpec,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    version: u64,
    /// First clock reading of an elapsed stream.
    origin: Option<f64>,
    available: bool,
}

impl Stream {
    pub fn new(spec: StreamSpec, history_limit: usize) -> Self {
        Self {
            spec,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            version: 0,
            origin: None,
            available: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    /// Number of events ever recorded.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn latest(&self) -> &Value {
        self.history
            .back()
            .map_or(&self.spec.default, |entry| &entry.value)
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub(crate) fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Append an event and return its version.
    pub(crate) fn record(&mut self, input: Value, sequence: u64) -> Result<u64, EngineError> {
        if !self.spec.shape.accepts(&input) {
            return Err(EngineError::StreamContract {
                stream: self.spec.name.to_string(),
                expected: self.spec.shape.describe(),
                found: input.to_string(),
            });
        }

        let value = match (self.spec.emission, &input) {
            (Emission::Elapsed, Value::Number(reading)) => {
                let origin = *self.origin.get_or_insert(reading.amount);
                Value::measure(reading.amount - origin, "ms")
            }
            _ => input.clone(),
        };

        self.version += 1;
        self.history.push_back(HistoryEntry {
            version: self.version,
            sequence,
            input,
            value,
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        Ok(self.version)
    }
}
