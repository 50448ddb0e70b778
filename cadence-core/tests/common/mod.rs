//! Shared helpers for integration tests.

#![allow(dead_code)]

use cadence_core::ast::{BinaryOp, NodeId, Tree, TreeBuilder};
use cadence_core::{Engine, StreamCatalog, StreamSpec};
use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `time() > 0ms`
pub fn time_check() -> Tree {
    let mut b = TreeBuilder::new();
    let time = b.stream("time");
    let zero = b.measure(0.0, "ms");
    let check = b.binary(time, BinaryOp::Greater, zero);
    b.finish(check).unwrap()
}

/// Built-in streams plus numeric streams `a` and `b`.
pub fn catalog_with_ab() -> StreamCatalog {
    StreamCatalog::builtin()
        .with(StreamSpec::number("a"))
        .with(StreamSpec::number("b"))
}

/// `[a() × 100  b() × 100]`, returning the tree and both products.
pub fn two_products() -> (Tree, NodeId, NodeId) {
    let mut b = TreeBuilder::new();
    let a = b.stream("a");
    let hundred = b.number(100.0);
    let left = b.binary(a, BinaryOp::Multiply, hundred);
    let bee = b.stream("b");
    let other_hundred = b.number(100.0);
    let right = b.binary(bee, BinaryOp::Multiply, other_hundred);
    let list = b.list([left, right]);
    (b.finish(list).unwrap(), left, right)
}

pub fn engine_with_ab(tree: Tree) -> Engine {
    Engine::new(tree, catalog_with_ab(), Default::default()).unwrap()
}
