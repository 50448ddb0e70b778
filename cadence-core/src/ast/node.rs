//! Tree Nodes
//!
//! This module defines the node types that live in the syntax tree arena.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Identifier of a node: its index in the owning [`Tree`](super::Tree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in its arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binary operators. A chain of them is applied strictly left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "×",
            BinaryOp::Divide => "÷",
            BinaryOp::Remainder => "%",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessOrEqual => "≤",
            BinaryOp::GreaterOrEqual => "≥",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "≠",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "~",
        }
    }
}

/// The closed set of node kinds.
///
/// Expected children per kind:
///
/// | kind | children |
/// |------|----------|
/// | `Program` | the program body |
/// | `Block` | one or more statements |
/// | `Bind` | the bound value |
/// | `List` | items |
/// | `Structure` | one value per field |
/// | `Property` | the subject |
/// | `Binary` | one more operand than operators |
/// | `Unary` | the operand |
/// | `Conditional` | condition, yes, no |
/// | `Function` | the body |
/// | `Call` | callee, then arguments |
/// | `Reaction` | initial, next; or initial, condition, next |
///
/// Every other kind is a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Program,
    Block,
    Bind { name: String },
    Number { amount: f64, unit: Option<String> },
    Text { text: String },
    Boolean { value: bool },
    List,
    Structure { fields: Vec<String> },
    Property { name: String },
    Reference { name: String },
    Binary { operators: SmallVec<[BinaryOp; 2]> },
    Unary { operator: UnaryOp },
    Conditional,
    Function { parameters: Vec<String> },
    Call,
    /// Reads the latest value of a stream.
    Stream { name: String },
    /// True in a pass iff the stream received events folded into that pass.
    Changed { stream: String },
    Reaction,
    /// The enclosing reaction's last committed value.
    Previous,
    Placeholder,
}

impl NodeKind {
    /// Short name used in diagnostics and exception messages.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program => "program",
            NodeKind::Block => "block",
            NodeKind::Bind { .. } => "bind",
            NodeKind::Number { .. } => "number",
            NodeKind::Text { .. } => "text",
            NodeKind::Boolean { .. } => "boolean",
            NodeKind::List => "list",
            NodeKind::Structure { .. } => "structure",
            NodeKind::Property { .. } => "property",
            NodeKind::Reference { .. } => "reference",
            NodeKind::Binary { .. } => "operation",
            NodeKind::Unary { .. } => "unary operation",
            NodeKind::Conditional => "conditional",
            NodeKind::Function { .. } => "function",
            NodeKind::Call => "call",
            NodeKind::Stream { .. } => "stream",
            NodeKind::Changed { .. } => "change check",
            NodeKind::Reaction => "reaction",
            NodeKind::Previous => "previous value",
            NodeKind::Placeholder => "placeholder",
        }
    }

    pub fn is_bind(&self) -> bool {
        matches!(self, NodeKind::Bind { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Stops the affected subtree from evaluating.
    Blocking,
    Warning,
}

/// A static diagnostic attached by the external analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Blocking,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// A node in the syntax tree.
///
/// Nodes never change once their tree is built. The parent link is only a
/// lookup aid; ownership runs strictly from parent to children.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    children: SmallVec<[NodeId; 4]>,
    parent: Option<NodeId>,
    diagnostic: Option<Diagnostic>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind, children: SmallVec<[NodeId; 4]>) -> Self {
        Self {
            id,
            kind,
            children,
            parent: None,
            diagnostic: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The parent node, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    /// Whether a blocking diagnostic is attached to this node.
    pub fn is_blocked(&self) -> bool {
        self.diagnostic.as_ref().is_some_and(Diagnostic::is_blocking)
    }

    pub(crate) fn set_parent(&mut self, parent: NodeId) {
        self.parent = Some(parent);
    }

    pub(crate) fn set_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostic = Some(diagnostic);
    }
}
