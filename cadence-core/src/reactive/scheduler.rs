//! Reactive Scheduler
//!
//! Turns queued stream events into discrete passes and decides which cached
//! values survive each one.
//!
//! # Pass Lifecycle
//!
//! 1. [`Scheduler::begin_pass`] drains the event queue, records every event
//!    in arrival order (marking readers stale), re-marks `∆` nodes that read
//!    true last pass, and freezes a snapshot. Events arriving after this
//!    point wait for the next pass.
//!
//! 2. The evaluator runs against the snapshot, collecting its writes in a
//!    [`PassRecord`].
//!
//! 3. [`Scheduler::commit`] applies the record atomically: cache writes,
//!    staleness cleanup, subscriptions, observed stream versions. A pass
//!    that does not commit goes through [`Scheduler::discard`] instead and
//!    leaves the cache and staleness untouched.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, warn};

use super::cache::{CacheEntry, ReactionCache};
use super::staleness::StaleGraph;
use crate::ast::{Analysis, NodeId, Tree};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::eval::PassRecord;
use crate::streams::events::EventQueue;
use crate::streams::{EventSender, Recorded, Snapshot, StreamCatalog, StreamRegistry};
use crate::value::Value;

#[derive(Debug)]
pub struct Scheduler {
    registry: StreamRegistry,
    queue: EventQueue,
    staleness: StaleGraph,
    cache: ReactionCache,
    /// `∆` nodes that read true in the last committed pass.
    edge_triggered: IndexSet<NodeId>,
    pass: u64,
    cache_capacity: Option<usize>,
}

impl Scheduler {
    pub fn new(catalog: Arc<StreamCatalog>, config: &EngineConfig) -> Self {
        Self {
            registry: StreamRegistry::new(Arc::clone(&catalog), config.history_limit),
            queue: EventQueue::new(catalog),
            staleness: StaleGraph::new(),
            cache: ReactionCache::new(),
            edge_triggered: IndexSet::new(),
            pass: 0,
            cache_capacity: config.cache_capacity,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ReactionCache {
        &self.cache
    }

    pub fn staleness(&self) -> &StaleGraph {
        &self.staleness
    }

    pub fn sender(&self) -> EventSender {
        self.queue.sender()
    }

    /// Events waiting for the next pass.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Number of the most recently started pass.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Record one event right away and mark its readers stale.
    pub fn record(
        &mut self,
        tree: &Tree,
        analysis: &Analysis,
        stream: &str,
        value: Value,
    ) -> Result<Recorded, EngineError> {
        let recorded = self.registry.record(stream, value)?;
        for &reader in &recorded.subscribers {
            self.staleness.mark_changed(tree, analysis, reader);
        }
        Ok(recorded)
    }

    /// Subscribe every stream reader of the tree up front, so readers that
    /// have not run yet still go stale.
    pub fn subscribe_readers(&mut self, analysis: &Analysis) {
        for (stream, reader) in analysis.stream_readers() {
            self.registry.subscribe(stream, *reader);
        }
    }

    /// Fold queued events in and freeze the snapshot for a new pass.
    pub fn begin_pass(&mut self, tree: &Tree, analysis: &Analysis) -> Arc<Snapshot> {
        for event in self.queue.drain() {
            if let Err(error) = self.record(tree, analysis, &event.stream, event.value) {
                warn!(stream = %event.stream, %error, "dropping stream event");
            }
        }
        for node in std::mem::take(&mut self.edge_triggered) {
            self.staleness.mark_changed(tree, analysis, node);
        }

        self.pass += 1;
        debug!(pass = self.pass, stale = self.staleness.len(), "pass started");
        Arc::new(self.registry.snapshot_all(self.pass))
    }

    /// Apply a finished pass.
    pub fn commit(&mut self, tree: &Tree, snapshot: &Snapshot, record: &PassRecord) {
        for (&node, write) in &record.writes {
            self.cache.insert(
                node,
                CacheEntry {
                    value: write.value.clone(),
                    pass: snapshot.pass(),
                    stream_version: write.stream_version,
                    reusable: write.reusable,
                    reaction: write.reaction,
                },
            );
            self.staleness.mark_clean(node);
        }
        for &node in &record.cleaned {
            self.staleness.clean_subtree(tree, node);
        }
        self.staleness.promote_pending();

        self.apply_subscriptions(record);
        self.edge_triggered = record.edge_triggered.clone();
        self.registry.mark_observed(snapshot);

        if let Some(capacity) = self.cache_capacity {
            let evicted = self.cache.evict(capacity);
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "evicted cached values");
            }
        }
    }

    /// Drop a pass that will not commit. Only its subscriptions survive.
    pub fn discard(&mut self, record: &PassRecord) {
        self.apply_subscriptions(record);
    }

    fn apply_subscriptions(&mut self, record: &PassRecord) {
        for (stream, reader) in &record.subscriptions {
            self.registry.subscribe(stream, *reader);
        }
    }

    pub fn set_available(
        &mut self,
        tree: &Tree,
        analysis: &Analysis,
        stream: &str,
        available: bool,
    ) -> Result<(), EngineError> {
        for reader in self.registry.set_available(stream, available)? {
            self.staleness.mark_changed(tree, analysis, reader);
        }
        Ok(())
    }

    /// Forget everything tied to the current tree.
    pub fn invalidate(&mut self) {
        self.cache.clear();
        self.staleness.clear();
        self.edge_triggered.clear();
        self.registry.unsubscribe_all();
    }

    /// Discard queued events and unsubscribe every reader.
    pub fn stop(&mut self) {
        self.queue.close();
        self.registry.unsubscribe_all();
        self.edge_triggered.clear();
    }
}
