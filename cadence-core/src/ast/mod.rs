//! Syntax Tree
//!
//! The engine consumes an immutable tree produced by an external parser.
//!
//! # Overview
//!
//! The tree is an arena indexed by [`NodeId`]:
//!
//! - Each node owns its children exclusively.
//! - Each node except the root has exactly one parent. Parent links are
//!   back-references used for lookup only.
//! - An edit never mutates a tree; the host builds a new one and hands it to
//!   the engine, which drops every cache tied to the old one.
//!
//! # Design Decisions
//!
//! 1. We use an index arena rather than reference-counted nodes because:
//!    - parent/child links would otherwise form reference cycles
//!    - node identity is a plain `Copy` id usable as a cache key
//!    - a bottom-up sweep over the arena replaces recursive traversals
//!
//! 2. Node kinds form a closed enum, so every per-kind behaviour (step
//!    generation, analysis) is an exhaustive `match` checked by the compiler.

mod analysis;
mod node;
mod source;
mod tree;

pub use analysis::{enclosing_reaction, Analysis, Resolution};
pub use node::{BinaryOp, Diagnostic, Node, NodeId, NodeKind, Severity, UnaryOp};
pub use source::Expr;
pub use tree::{Tree, TreeBuilder};
