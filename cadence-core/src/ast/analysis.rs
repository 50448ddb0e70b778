//! Static Analysis
//!
//! Facts about a tree that the reactive machinery needs and that only depend
//! on its structure. They are computed once per tree.
//!
//! - Reference resolution: which `Bind` (or parameter) a name refers to.
//!   Inside function bodies the whole enclosing block is searched, since the
//!   body runs after the block has finished binding.
//! - Bind dependencies: for every node, the binds outside its subtree that
//!   its subtree reads. A node whose dependencies kept their values can
//!   reuse its cached value.
//! - Volatility: nodes whose value differs between evaluations within a
//!   single pass (function bodies) or between passes without any stale input
//!   (the path from a `Previous` to its reaction). These are never reused.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use super::node::{NodeId, NodeKind};
use super::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Bind(NodeId),
    Parameter { function: NodeId, index: usize },
    /// Not bound in the tree; looked up in the engine's globals.
    Global,
}

#[derive(Debug, Default)]
pub struct Analysis {
    resolutions: HashMap<NodeId, Resolution>,
    referrers: HashMap<NodeId, SmallVec<[NodeId; 4]>>,
    dependencies: Vec<SmallVec<[NodeId; 2]>>,
    volatile: Vec<bool>,
    stream_readers: Vec<(Arc<str>, NodeId)>,
    blocking: Vec<NodeId>,
}

impl Analysis {
    /// Analyse `tree` in one pass over its nodes.
    pub fn new(tree: &Tree) -> Self {
        let mut analysis = Self {
            volatile: vec![false; tree.len()],
            ..Self::default()
        };

        for node in tree.iter() {
            let id = node.id();
            match node.kind() {
                NodeKind::Reference { name } => {
                    let resolution = resolve(tree, id, name);
                    if let Resolution::Bind(bind) = resolution {
                        analysis.referrers.entry(bind).or_default().push(id);
                    }
                    analysis.resolutions.insert(id, resolution);
                }
                NodeKind::Stream { name } => {
                    analysis.stream_readers.push((name.as_str().into(), id));
                }
                NodeKind::Changed { stream } => {
                    analysis.stream_readers.push((stream.as_str().into(), id));
                }
                NodeKind::Previous => analysis.mark_previous_path(tree, id),
                _ => {}
            }
            if node.is_blocked() {
                analysis.blocking.push(id);
            }
            if tree
                .ancestors(id)
                .any(|a| matches!(tree.kind(a), NodeKind::Function { .. }))
            {
                analysis.volatile[id.index()] = true;
            }
        }

        // Children precede parents, so one forward sweep sees every child first.
        analysis.dependencies.reserve(tree.len());
        for node in tree.iter() {
            let id = node.id();
            let mut deps: SmallVec<[NodeId; 2]> = SmallVec::new();
            if let Some(Resolution::Bind(bind)) = analysis.resolutions.get(&id) {
                deps.push(*bind);
            }
            for &child in node.children() {
                for &bind in &analysis.dependencies[child.index()] {
                    if !deps.contains(&bind) && !tree.is_ancestor_or_self(id, bind) {
                        deps.push(bind);
                    }
                }
            }
            analysis.dependencies.push(deps);
        }

        analysis
    }

    fn mark_previous_path(&mut self, tree: &Tree, previous: NodeId) {
        let Some(reaction) = enclosing_reaction(tree, previous) else {
            return;
        };
        self.volatile[previous.index()] = true;
        for ancestor in tree.ancestors(previous) {
            if ancestor == reaction {
                break;
            }
            self.volatile[ancestor.index()] = true;
        }
    }

    /// What `reference` resolves to; `None` for nodes that are not references.
    pub fn resolution(&self, reference: NodeId) -> Option<Resolution> {
        self.resolutions.get(&reference).copied()
    }

    /// References that resolve to `bind`.
    pub fn referrers(&self, bind: NodeId) -> &[NodeId] {
        self.referrers.get(&bind).map_or(&[], |refs| refs.as_slice())
    }

    /// Binds outside the subtree of `id` that the subtree reads.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.dependencies.get(id.index()).map_or(&[], |deps| deps.as_slice())
    }

    /// Whether `id` must run every time it is reached.
    ///
    /// Function bodies and paths to `.` are volatile. Unknown ids are too.
    pub fn is_volatile(&self, id: NodeId) -> bool {
        self.volatile.get(id.index()).copied().unwrap_or(true)
    }

    /// Every `Stream` and `Changed` node with the stream it reads.
    pub fn stream_readers(&self) -> &[(Arc<str>, NodeId)] {
        &self.stream_readers
    }

    /// Nodes carrying a blocking diagnostic.
    pub fn blocking(&self) -> &[NodeId] {
        &self.blocking
    }
}

/// The nearest `Reaction` above `id`.
pub fn enclosing_reaction(tree: &Tree, id: NodeId) -> Option<NodeId> {
    tree.ancestors(id)
        .find(|&ancestor| matches!(tree.kind(ancestor), NodeKind::Reaction))
}

fn resolve(tree: &Tree, reference: NodeId, name: &str) -> Resolution {
    let binds = |id: &&NodeId| matches!(tree.kind(**id), NodeKind::Bind { name: bound } if bound == name);
    let mut child = reference;
    let mut in_function = false;

    for ancestor in tree.ancestors(reference) {
        match tree.kind(ancestor) {
            NodeKind::Block => {
                let statements = tree.children(ancestor);
                let position = statements
                    .iter()
                    .position(|&statement| statement == child)
                    .unwrap_or(statements.len());
                if let Some(&bind) = statements[..position].iter().rev().find(binds) {
                    return Resolution::Bind(bind);
                }
                if in_function {
                    if let Some(&bind) = statements[position..].iter().find(binds) {
                        return Resolution::Bind(bind);
                    }
                }
            }
            NodeKind::Function { parameters } => {
                if let Some(index) = parameters.iter().position(|p| p == name) {
                    return Resolution::Parameter {
                        function: ancestor,
                        index,
                    };
                }
                in_function = true;
            }
            _ => {}
        }
        child = ancestor;
    }

    Resolution::Global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Diagnostic, TreeBuilder};

    #[test]
    fn reference_resolves_to_preceding_bind() {
        let mut b = TreeBuilder::new();
        let one = b.number(1.0);
        let x = b.bind("x", one);
        let use_x = b.reference("x");
        let block = b.block([x, use_x]);
        let tree = b.finish(block).unwrap();
        let analysis = Analysis::new(&tree);

        assert_eq!(analysis.resolution(use_x), Some(Resolution::Bind(x)));
        assert_eq!(analysis.referrers(x), &[use_x]);
        assert_eq!(analysis.dependencies(use_x), &[x]);
        // The block contains the bind, so it has no outside dependency.
        assert!(analysis.dependencies(block).is_empty());
    }

    #[test]
    fn bind_cannot_see_itself_outside_functions() {
        let mut b = TreeBuilder::new();
        let x_ref = b.reference("x");
        let one = b.number(1.0);
        let sum = b.binary(x_ref, BinaryOp::Add, one);
        let x = b.bind("x", sum);
        let block = b.block([x]);
        let tree = b.finish(block).unwrap();
        let analysis = Analysis::new(&tree);

        assert_eq!(analysis.resolution(x_ref), Some(Resolution::Global));
    }

    #[test]
    fn function_body_sees_later_binds_and_parameters() {
        let mut b = TreeBuilder::new();
        let f_ref = b.reference("f");
        let n_ref = b.reference("n");
        let later_ref = b.reference("later");
        let body = b.call(f_ref, [n_ref, later_ref]);
        let function = b.function(&["n"], body);
        let f = b.bind("f", function);
        let two = b.number(2.0);
        let later = b.bind("later", two);
        let block = b.block([f, later]);
        let tree = b.finish(block).unwrap();
        let analysis = Analysis::new(&tree);

        assert_eq!(analysis.resolution(f_ref), Some(Resolution::Bind(f)));
        assert_eq!(
            analysis.resolution(n_ref),
            Some(Resolution::Parameter {
                function,
                index: 0
            })
        );
        assert_eq!(analysis.resolution(later_ref), Some(Resolution::Bind(later)));
        assert!(analysis.is_volatile(body));
        assert!(!analysis.is_volatile(function));
        assert!(analysis.dependencies(function).contains(&later));
    }

    #[test]
    fn previous_path_is_volatile_up_to_reaction() {
        let mut b = TreeBuilder::new();
        let zero = b.number(0.0);
        let previous = b.previous();
        let one = b.number(1.0);
        let next = b.binary(previous, BinaryOp::Add, one);
        let reaction = b.reaction(zero, next);
        let tree = b.finish(reaction).unwrap();
        let analysis = Analysis::new(&tree);

        assert!(analysis.is_volatile(previous));
        assert!(analysis.is_volatile(next));
        assert!(!analysis.is_volatile(one));
        assert!(!analysis.is_volatile(reaction));
        assert_eq!(enclosing_reaction(&tree, previous), Some(reaction));
    }

    #[test]
    fn collects_stream_readers_and_blocking_nodes() {
        let mut b = TreeBuilder::new();
        let time = b.stream("time");
        let changed = b.changed("keyboard");
        b.diagnose(changed, Diagnostic::blocking("nope"));
        let list = b.list([time, changed]);
        let tree = b.finish(list).unwrap();
        let analysis = Analysis::new(&tree);

        let streams: Vec<_> = analysis
            .stream_readers()
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect();
        assert_eq!(
            streams,
            vec![("time".to_string(), time), ("keyboard".to_string(), changed)]
        );
        assert_eq!(analysis.blocking(), &[changed]);
    }
}
