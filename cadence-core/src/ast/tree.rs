//! Tree Arena
//!
//! A [`Tree`] is an immutable, index-addressed arena of [`Node`]s. Children
//! are always stored before their parents, which makes the tree acyclic by
//! construction and lets bottom-up analyses run in a single forward sweep.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::node::{BinaryOp, Diagnostic, Node, NodeId, NodeKind, UnaryOp};
use crate::error::TreeError;

/// Counter for tree revisions. Every built tree gets a fresh one.
static REVISION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An immutable syntax tree.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    revision: u64,
}

impl Tree {
    /// The `Program` node at the top of the tree.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Unique per built tree; an edit always produces a new revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Look up a node of this tree.
    ///
    /// Panics if `id` was not issued by this tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        self.node(id).kind()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent()
    }

    /// Ancestors of `id`, nearest first, ending at the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&node| self.parent(node))
    }

    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|node| node == ancestor)
    }

    /// All nodes in arena order (children before parents).
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// `id` and everything below it, in pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            found.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        found
    }
}

/// Assembles a [`Tree`] bottom-up.
///
/// Each constructor returns the new node's id; pass ids to parent
/// constructors and finally to [`TreeBuilder::finish`], which wraps the body
/// in a `Program` node and links parents.
///
/// ```rust,ignore
/// let mut b = TreeBuilder::new();
/// let time = b.stream("time");
/// let zero = b.measure(0.0, "ms");
/// let body = b.binary(time, BinaryOp::Greater, zero);
/// let tree = b.finish(body)?;
/// ```
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of any kind with the given children, without arity checks.
    pub fn node(&mut self, kind: NodeKind, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Node::new(id, kind, children.into_iter().collect()));
        id
    }

    pub fn number(&mut self, amount: f64) -> NodeId {
        self.node(NodeKind::Number { amount, unit: None }, [])
    }

    /// A number with a unit, such as `500ms`.
    pub fn measure(&mut self, amount: f64, unit: &str) -> NodeId {
        self.node(
            NodeKind::Number {
                amount,
                unit: Some(unit.to_string()),
            },
            [],
        )
    }

    pub fn text(&mut self, text: &str) -> NodeId {
        self.node(NodeKind::Text { text: text.to_string() }, [])
    }

    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.node(NodeKind::Boolean { value }, [])
    }

    pub fn reference(&mut self, name: &str) -> NodeId {
        self.node(NodeKind::Reference { name: name.to_string() }, [])
    }

    pub fn list(&mut self, items: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.node(NodeKind::List, items)
    }

    pub fn structure<'a>(&mut self, fields: impl IntoIterator<Item = (&'a str, NodeId)>) -> NodeId {
        let (names, values): (Vec<String>, Vec<NodeId>) = fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .unzip();
        self.node(NodeKind::Structure { fields: names }, values)
    }

    pub fn property(&mut self, subject: NodeId, name: &str) -> NodeId {
        self.node(NodeKind::Property { name: name.to_string() }, [subject])
    }

    pub fn binary(&mut self, left: NodeId, operator: BinaryOp, right: NodeId) -> NodeId {
        self.chain(left, [(operator, right)])
    }

    /// An operator chain such as `2 + 3 × 2`, applied left to right.
    pub fn chain(
        &mut self,
        first: NodeId,
        rest: impl IntoIterator<Item = (BinaryOp, NodeId)>,
    ) -> NodeId {
        let mut operators = SmallVec::new();
        let mut operands = vec![first];
        for (operator, operand) in rest {
            operators.push(operator);
            operands.push(operand);
        }
        self.node(NodeKind::Binary { operators }, operands)
    }

    pub fn unary(&mut self, operator: UnaryOp, operand: NodeId) -> NodeId {
        self.node(NodeKind::Unary { operator }, [operand])
    }

    pub fn conditional(&mut self, condition: NodeId, yes: NodeId, no: NodeId) -> NodeId {
        self.node(NodeKind::Conditional, [condition, yes, no])
    }

    pub fn function(&mut self, parameters: &[&str], body: NodeId) -> NodeId {
        let parameters = parameters.iter().map(|p| p.to_string()).collect();
        self.node(NodeKind::Function { parameters }, [body])
    }

    pub fn call(&mut self, callee: NodeId, arguments: impl IntoIterator<Item = NodeId>) -> NodeId {
        let children = std::iter::once(callee).chain(arguments);
        self.node(NodeKind::Call, children)
    }

    pub fn bind(&mut self, name: &str, value: NodeId) -> NodeId {
        self.node(NodeKind::Bind { name: name.to_string() }, [value])
    }

    pub fn block(&mut self, statements: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.node(NodeKind::Block, statements)
    }

    /// A read of a stream, such as `time()`.
    pub fn stream(&mut self, name: &str) -> NodeId {
        self.node(NodeKind::Stream { name: name.to_string() }, [])
    }

    /// `∆ stream`
    pub fn changed(&mut self, stream: &str) -> NodeId {
        self.node(NodeKind::Changed { stream: stream.to_string() }, [])
    }

    /// `initial … next`
    pub fn reaction(&mut self, initial: NodeId, next: NodeId) -> NodeId {
        self.node(NodeKind::Reaction, [initial, next])
    }

    /// `initial … condition … next`
    pub fn reaction_when(&mut self, initial: NodeId, condition: NodeId, next: NodeId) -> NodeId {
        self.node(NodeKind::Reaction, [initial, condition, next])
    }

    /// `.` inside a reaction.
    pub fn previous(&mut self) -> NodeId {
        self.node(NodeKind::Previous, [])
    }

    pub fn placeholder(&mut self) -> NodeId {
        self.node(NodeKind::Placeholder, [])
    }

    /// Attach a diagnostic to an already-created node.
    pub fn diagnose(&mut self, id: NodeId, diagnostic: Diagnostic) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.set_diagnostic(diagnostic);
        }
    }

    /// Wrap `body` in a `Program` node, link parents and validate ownership.
    pub fn finish(mut self, body: NodeId) -> Result<Tree, TreeError> {
        let root = self.node(NodeKind::Program, [body]);
        let mut parents: Vec<Option<NodeId>> = vec![None; self.nodes.len()];

        for node in &self.nodes {
            let parent = node.id();
            for &child in node.children() {
                if child.index() >= self.nodes.len() {
                    return Err(TreeError::UnknownChild { parent, child });
                }
                if child >= parent {
                    return Err(TreeError::ChildAfterParent { parent, child });
                }
                if let Some(first) = parents[child.index()] {
                    return Err(TreeError::SharedChild {
                        child,
                        first,
                        second: parent,
                    });
                }
                parents[child.index()] = Some(parent);
            }
        }

        for (index, parent) in parents.into_iter().enumerate() {
            match parent {
                Some(parent) => self.nodes[index].set_parent(parent),
                None if index != root.index() => {
                    return Err(TreeError::Orphan(NodeId::from_index(index)))
                }
                None => {}
            }
        }

        Ok(Tree {
            nodes: self.nodes,
            root,
            revision: REVISION_COUNTER.fetch_add(1, Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree, NodeId, NodeId) {
        let mut b = TreeBuilder::new();
        let one = b.number(1.0);
        let two = b.number(2.0);
        let sum = b.binary(one, BinaryOp::Add, two);
        let tree = b.finish(sum).unwrap();
        (tree, one, sum)
    }

    #[test]
    fn finish_wraps_body_in_program() {
        let (tree, _, sum) = sample();
        assert_eq!(tree.kind(tree.root()), &NodeKind::Program);
        assert_eq!(tree.children(tree.root()), &[sum]);
        assert_eq!(tree.parent(sum), Some(tree.root()));
        assert!(tree.parent(tree.root()).is_none());
    }

    #[test]
    fn ancestors_walk_to_root() {
        let (tree, one, sum) = sample();
        let ancestors: Vec<_> = tree.ancestors(one).collect();
        assert_eq!(ancestors, vec![sum, tree.root()]);
        assert!(tree.is_ancestor_or_self(sum, one));
        assert!(!tree.is_ancestor_or_self(one, sum));
    }

    #[test]
    fn descendants_are_preorder() {
        let (tree, one, sum) = sample();
        let all = tree.descendants(tree.root());
        assert_eq!(all[0], tree.root());
        assert_eq!(all[1], sum);
        assert_eq!(all[2], one);
        assert_eq!(all.len(), tree.len());
    }

    #[test]
    fn revisions_are_unique() {
        let (first, _, _) = sample();
        let (second, _, _) = sample();
        assert_ne!(first.revision(), second.revision());
    }

    #[test]
    fn shared_child_is_rejected() {
        let mut b = TreeBuilder::new();
        let one = b.number(1.0);
        let left = b.list([one]);
        let right = b.list([one]);
        let both = b.list([left, right]);
        assert!(matches!(b.finish(both), Err(TreeError::SharedChild { .. })));
    }

    #[test]
    fn orphan_is_rejected() {
        let mut b = TreeBuilder::new();
        let _unused = b.number(1.0);
        let body = b.number(2.0);
        assert!(matches!(b.finish(body), Err(TreeError::Orphan(_))));
    }

    #[test]
    fn forward_child_is_rejected() {
        let mut b = TreeBuilder::new();
        let list = b.node(NodeKind::List, [NodeId::from(1)]);
        let _later = b.number(1.0);
        assert!(matches!(
            b.finish(list),
            Err(TreeError::ChildAfterParent { .. }) | Err(TreeError::UnknownChild { .. })
        ));
    }

    #[test]
    fn diagnostics_attach_to_nodes() {
        let mut b = TreeBuilder::new();
        let name = b.reference("x");
        b.diagnose(name, Diagnostic::blocking("x is undefined"));
        let tree = b.finish(name).unwrap();
        assert!(tree.node(name).is_blocked());
    }
}
