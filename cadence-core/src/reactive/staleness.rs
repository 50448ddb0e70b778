//! Staleness Tracking
//!
//! Decides which cached node values are still valid after stream events.
//!
//! # Algorithm
//!
//! When a stream records an event, each node reading it is marked:
//!
//! 1. The reader and every ancestor up to the root become `Dirty`: their
//!    value is computed from the stream, so it must be recomputed.
//! 2. Whenever the walk reaches a `Bind`, every reference to that bind
//!    (and every ancestor of those references) becomes `MaybeDirty`: they
//!    only need recomputing if the bind's value turns out to differ.
//! 3. During the pass, the evaluator resolves each `MaybeDirty` node by
//!    checking whether any bind it depends on changed.
//!
//! This is the same push-pull split as a signal graph: eager marking, lazy
//! verification.

use std::collections::{HashMap, VecDeque};

use crate::ast::{Analysis, NodeId, Tree};

/// How much a node's cached value can be trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirtyState {
    /// The cached value is up to date.
    #[default]
    Clean,

    /// A bind the node reads might have changed.
    MaybeDirty,

    /// An input definitely changed.
    Dirty,
}

/// Non-clean nodes of the current tree.
#[derive(Debug, Default)]
pub struct StaleGraph {
    states: HashMap<NodeId, DirtyState>,
    /// Nodes already walked from since the last cleanup, with the state
    /// they were walked at. Their ancestors and referrers are marked too.
    propagated: HashMap<NodeId, DirtyState>,
}

impl StaleGraph {
    /// Create an empty graph where every node is clean.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `id`; unmarked nodes are clean.
    pub fn state(&self, id: NodeId) -> DirtyState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    /// Whether `id` can be reused without checking anything.
    pub fn is_clean(&self, id: NodeId) -> bool {
        self.state(id) == DirtyState::Clean
    }

    /// Number of nodes that are not clean.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Raise `id` to at least `state`. Never lowers a state.
    pub fn mark(&mut self, id: NodeId, state: DirtyState) {
        if state == DirtyState::Clean {
            return;
        }
        let entry = self.states.entry(id).or_default();
        *entry = (*entry).max(state);
    }

    /// Mark a stream reader as changed and propagate.
    ///
    /// The walk stops at nodes already walked at the same or a higher state
    /// since the last cleanup, so a burst of events on one stream costs one
    /// walk. Returns every node whose state was raised.
    pub fn mark_changed(&mut self, tree: &Tree, analysis: &Analysis, reader: NodeId) -> Vec<NodeId> {
        let mut raised = Vec::new();
        let mut queue = VecDeque::from([(reader, DirtyState::Dirty)]);

        while let Some((id, state)) = queue.pop_front() {
            if tree.get(id).is_none() {
                continue;
            }
            match self.propagated.get(&id) {
                Some(&seen) if seen >= state => continue,
                _ => {
                    self.propagated.insert(id, state);
                }
            }

            if self.state(id) < state {
                self.states.insert(id, state);
                raised.push(id);
            }

            if tree.kind(id).is_bind() {
                for &referrer in analysis.referrers(id) {
                    queue.push_back((referrer, DirtyState::MaybeDirty));
                }
            }
            if let Some(parent) = tree.parent(id) {
                queue.push_back((parent, state));
            }
        }

        raised
    }

    /// Forget the mark on `id` after its value was recomputed.
    pub fn mark_clean(&mut self, id: NodeId) {
        self.states.remove(&id);
        self.forget_walks();
    }

    /// Clean `id` and every marked node below it.
    ///
    /// The walk stops at unmarked nodes. Whatever stays marked under them
    /// was not read by the pass and is checked again on the next one.
    pub fn clean_subtree(&mut self, tree: &Tree, id: NodeId) {
        self.forget_walks();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if self.states.remove(&node).is_some() || node == id {
                stack.extend(tree.children(node).iter().copied());
            }
        }
    }

    /// Turn every remaining `MaybeDirty` into `Dirty`.
    ///
    /// Bind outcomes only live for one pass, so a node left unverified must
    /// be recomputed next time.
    pub fn promote_pending(&mut self) {
        for state in self.states.values_mut() {
            if *state == DirtyState::MaybeDirty {
                *state = DirtyState::Dirty;
            }
        }
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        self.states.clear();
        self.propagated.clear();
    }

    /// Cleaning can leave a marked node under a clean ancestor (an untaken
    /// branch, say), so earlier walks no longer prove anything.
    fn forget_walks(&mut self) {
        if !self.propagated.is_empty() {
            self.propagated.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, TreeBuilder};

    /// `{ tick: time()  a: tick % 2  b: 7  [a b] }`
    struct Program {
        tree: Tree,
        analysis: Analysis,
        time: NodeId,
        tick: NodeId,
        tick_ref: NodeId,
        a: NodeId,
        a_ref: NodeId,
        seven: NodeId,
        list: NodeId,
    }

    fn program() -> Program {
        let mut b = TreeBuilder::new();
        let time = b.stream("time");
        let tick = b.bind("tick", time);
        let tick_ref = b.reference("tick");
        let two = b.number(2.0);
        let modulus = b.binary(tick_ref, BinaryOp::Remainder, two);
        let a = b.bind("a", modulus);
        let seven = b.number(7.0);
        let bound_seven = b.bind("b", seven);
        let a_ref = b.reference("a");
        let b_ref = b.reference("b");
        let list = b.list([a_ref, b_ref]);
        let block = b.block([tick, a, bound_seven, list]);
        let tree = b.finish(block).unwrap();
        let analysis = Analysis::new(&tree);
        Program {
            tree,
            analysis,
            time,
            tick,
            tick_ref,
            a,
            a_ref,
            seven,
            list,
        }
    }

    #[test]
    fn reader_and_ancestors_become_dirty() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);

        assert_eq!(graph.state(p.time), DirtyState::Dirty);
        assert_eq!(graph.state(p.tick), DirtyState::Dirty);
        assert_eq!(graph.state(p.tree.root()), DirtyState::Dirty);
        assert_eq!(graph.state(p.seven), DirtyState::Clean);
    }

    #[test]
    fn references_to_binds_become_maybe_dirty() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);

        assert_eq!(graph.state(p.tick_ref), DirtyState::MaybeDirty);
        assert_eq!(graph.state(p.a), DirtyState::MaybeDirty);
        assert_eq!(graph.state(p.a_ref), DirtyState::MaybeDirty);
        assert_eq!(graph.state(p.list), DirtyState::MaybeDirty);
    }

    #[test]
    fn marking_again_raises_nothing() {
        let p = program();
        let mut graph = StaleGraph::new();
        assert!(!graph.mark_changed(&p.tree, &p.analysis, p.time).is_empty());
        assert!(graph.mark_changed(&p.tree, &p.analysis, p.time).is_empty());
    }

    #[test]
    fn clean_subtree_stops_at_clean_nodes() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);
        graph.clean_subtree(&p.tree, p.a);

        assert!(graph.is_clean(p.a));
        assert!(graph.is_clean(p.tick_ref));
        assert_eq!(graph.state(p.tick), DirtyState::Dirty);
    }

    #[test]
    fn pending_nodes_are_promoted() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);
        graph.promote_pending();

        assert_eq!(graph.state(p.a_ref), DirtyState::Dirty);
        graph.mark(p.a_ref, DirtyState::MaybeDirty);
        assert_eq!(graph.state(p.a_ref), DirtyState::Dirty);

        graph.clear();
        assert!(graph.is_empty());
    }

    #[test]
    fn repeated_marks_skip_walked_nodes() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);

        // Dropped by hand, bypassing cleanup: a second walk would restore it.
        graph.states.remove(&p.tree.root());
        assert!(graph.mark_changed(&p.tree, &p.analysis, p.time).is_empty());
        assert!(graph.is_clean(p.tree.root()));
    }

    #[test]
    fn cleanup_makes_the_next_mark_walk_again() {
        let p = program();
        let mut graph = StaleGraph::new();
        graph.mark_changed(&p.tree, &p.analysis, p.time);

        // The reader stays dirty under a parent that was recomputed.
        graph.mark_clean(p.tick);
        graph.mark_clean(p.tree.root());
        assert_eq!(graph.state(p.time), DirtyState::Dirty);

        let raised = graph.mark_changed(&p.tree, &p.analysis, p.time);
        assert!(raised.contains(&p.tick));
        assert_eq!(graph.state(p.tree.root()), DirtyState::Dirty);
    }
}
