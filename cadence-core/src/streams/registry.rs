//! Stream Registry
//!
//! The registry owns every live [`Stream`] of a program and knows which
//! nodes read each of them.
//!
//! # How It Works
//!
//! 1. [`StreamRegistry::record`] appends an event to a stream's history and
//!    hands back the stream's subscribers, which the scheduler marks stale.
//!
//! 2. At pass start, [`StreamRegistry::snapshot_all`] freezes every stream's
//!    latest value. The evaluator reads only the snapshot, never a live
//!    stream.
//!
//! 3. When a pass commits, the versions it saw become the "observed"
//!    versions. A stream whose version is ahead of its observed version has
//!    changed for the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use super::catalog::{Emission, StreamCatalog};
use super::events::{EventLog, LoggedEvent};
use super::stream::Stream;
use crate::ast::NodeId;
use crate::error::EngineError;
use crate::value::Value;

/// Result of recording one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub stream: Arc<str>,
    pub version: u64,
    /// Nodes reading the stream, to be marked stale.
    pub subscribers: Vec<NodeId>,
}

/// One stream as seen by a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub value: Value,
    pub version: u64,
    /// Events were folded into this pass.
    pub changed: bool,
    /// The stream was unavailable; `value` is its default.
    pub degraded: bool,
    pub on_demand: bool,
}

/// Point-in-time copy of every stream, taken once per pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pass: u64,
    entries: IndexMap<Arc<str>, SnapshotEntry>,
}

impl Snapshot {
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn get(&self, stream: &str) -> Option<&SnapshotEntry> {
        self.entries.get(stream)
    }

    pub fn value(&self, stream: &str) -> Option<&Value> {
        self.get(stream).map(|entry| &entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SnapshotEntry)> {
        self.entries.iter().map(|(name, entry)| (&**name, entry))
    }

    /// Streams that received events folded into this pass.
    pub fn changed(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, entry)| entry.changed)
            .map(|(name, _)| name)
    }
}

#[derive(Debug)]
pub struct StreamRegistry {
    catalog: Arc<StreamCatalog>,
    streams: IndexMap<Arc<str>, Stream>,
    subscribers: HashMap<Arc<str>, IndexSet<NodeId>>,
    observed: HashMap<Arc<str>, u64>,
    sequence: u64,
}

impl StreamRegistry {
    /// Create one stream per catalog entry.
    pub fn new(catalog: Arc<StreamCatalog>, history_limit: usize) -> Self {
        let streams = catalog
            .specs()
            .map(|spec| {
                (
                    Arc::clone(&spec.name),
                    Stream::new(spec.clone(), history_limit),
                )
            })
            .collect();
        Self {
            catalog,
            streams,
            subscribers: HashMap::new(),
            observed: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn catalog(&self) -> &Arc<StreamCatalog> {
        &self.catalog
    }

    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// Append an event to a stream's history.
    pub fn record(&mut self, name: &str, value: Value) -> Result<Recorded, EngineError> {
        let (key, stream) = self
            .streams
            .get_full_mut(name)
            .map(|(_, key, stream)| (key, stream))
            .ok_or_else(|| EngineError::UnknownStream(name.to_string()))?;
        let version = stream.record(value, self.sequence)?;
        self.sequence += 1;

        let stream = Arc::clone(key);
        let subscribers = self
            .subscribers
            .get(&stream)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default();
        debug!(%stream, version, "recorded stream event");
        Ok(Recorded {
            stream,
            version,
            subscribers,
        })
    }

    /// Register `node` as a reader of `stream`. Returns whether it is new.
    pub fn subscribe(&mut self, stream: &str, node: NodeId) -> bool {
        let Some((key, _)) = self.streams.get_key_value(stream) else {
            return false;
        };
        self.subscribers
            .entry(Arc::clone(key))
            .or_default()
            .insert(node)
    }

    pub fn subscribers(&self, stream: &str) -> impl Iterator<Item = NodeId> + '_ {
        self.subscribers
            .get(stream)
            .into_iter()
            .flat_map(|nodes| nodes.iter().copied())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.values().map(IndexSet::len).sum()
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscribers.clear();
    }

    /// Freeze every stream's latest value for one pass.
    pub fn snapshot_all(&self, pass: u64) -> Snapshot {
        let entries = self
            .streams
            .iter()
            .map(|(name, stream)| {
                let observed = self.observed.get(name).copied().unwrap_or(0);
                let available = stream.is_available();
                let entry = SnapshotEntry {
                    value: if available {
                        stream.latest().clone()
                    } else {
                        stream.spec().default.clone()
                    },
                    version: stream.version(),
                    changed: stream.version() > observed,
                    degraded: !available,
                    on_demand: stream.spec().emission == Emission::OnDemand,
                };
                (Arc::clone(name), entry)
            })
            .collect();
        Snapshot { pass, entries }
    }

    /// Remember the versions a committed pass saw.
    pub fn mark_observed(&mut self, snapshot: &Snapshot) {
        for (name, entry) in &snapshot.entries {
            self.observed.insert(Arc::clone(name), entry.version);
        }
    }

    /// Toggle availability and return the stream's readers.
    pub fn set_available(&mut self, name: &str, available: bool) -> Result<Vec<NodeId>, EngineError> {
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownStream(name.to_string()))?;
        if stream.is_available() == available {
            return Ok(Vec::new());
        }
        stream.set_available(available);
        if !available {
            warn!(stream = name, "stream unavailable, reads degrade");
        }
        Ok(self.subscribers(name).collect())
    }

    /// Retained history of all streams in recording order.
    pub fn event_log(&self) -> EventLog {
        let mut events: Vec<LoggedEvent> = self
            .streams
            .values()
            .flat_map(|stream| {
                stream.history().map(move |entry| LoggedEvent {
                    sequence: entry.sequence,
                    stream: stream.name().to_string(),
                    input: entry.input.clone(),
                })
            })
            .collect();
        events.sort_by_key(|event| event.sequence);
        EventLog { events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StreamRegistry {
        StreamRegistry::new(Arc::new(StreamCatalog::builtin()), 16)
    }

    #[test]
    fn record_returns_subscribers() {
        let mut registry = registry();
        assert!(registry.subscribe("keyboard", NodeId::from(3)));
        assert!(!registry.subscribe("keyboard", NodeId::from(3)));
        assert!(!registry.subscribe("weather", NodeId::from(4)));

        let recorded = registry.record("keyboard", Value::text("k")).unwrap();
        assert_eq!(recorded.version, 1);
        assert_eq!(recorded.subscribers, vec![NodeId::from(3)]);

        let recorded = registry.record("time", Value::number(1.0)).unwrap();
        assert!(recorded.subscribers.is_empty());
    }

    #[test]
    fn unknown_stream_is_an_error() {
        let mut registry = registry();
        assert!(matches!(
            registry.record("weather", Value::number(1.0)),
            Err(EngineError::UnknownStream(_))
        ));
    }

    #[test]
    fn snapshot_reports_changes_since_observed() {
        let mut registry = registry();
        registry.record("keyboard", Value::text("a")).unwrap();
        registry.record("keyboard", Value::text("b")).unwrap();

        let snapshot = registry.snapshot_all(1);
        let keyboard = snapshot.get("keyboard").unwrap();
        assert_eq!(keyboard.value, Value::text("b"));
        assert!(keyboard.changed);
        assert!(!snapshot.get("time").unwrap().changed);
        assert!(snapshot.get("random").unwrap().on_demand);

        registry.mark_observed(&snapshot);
        let next = registry.snapshot_all(2);
        assert_eq!(next.changed().count(), 0);
    }

    #[test]
    fn unavailable_stream_reads_default() {
        let mut registry = registry();
        registry.subscribe("keyboard", NodeId::from(1));
        registry.record("keyboard", Value::text("a")).unwrap();

        let readers = registry.set_available("keyboard", false).unwrap();
        assert_eq!(readers, vec![NodeId::from(1)]);
        let entry = registry.snapshot_all(1).get("keyboard").cloned().unwrap();
        assert!(entry.degraded);
        assert_eq!(entry.value, Value::text(""));
    }

    #[test]
    fn event_log_interleaves_streams() {
        let mut registry = registry();
        registry.record("keyboard", Value::text("a")).unwrap();
        registry.record("time", Value::number(10.0)).unwrap();
        registry.record("keyboard", Value::text("b")).unwrap();

        let streams: Vec<_> = registry
            .event_log()
            .events
            .into_iter()
            .map(|event| event.stream)
            .collect();
        assert_eq!(streams, vec!["keyboard", "time", "keyboard"]);
    }
}
