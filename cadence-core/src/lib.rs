//! Cadence Core
//!
//! This crate provides the evaluation engine for Cadence, a small
//! expression language whose programs react to streams of input over time.
//! It implements:
//!
//! - Step generation: each tree node compiles to a flat sequence of steps
//! - A step-wise evaluator that can pause, resume and stop at any step
//! - A registry of input streams (time, keyboard, mouse, custom streams)
//! - Incremental re-evaluation driven by stream events
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `ast`: The immutable syntax tree handed in by the host, plus the
//!   static analysis the engine derives from it
//! - `steps`: Step sequences and the lazy per-node step cache
//! - `value`: Runtime values, exceptions, closures and scopes
//! - `eval`: The step-wise evaluator and the per-pass record it produces
//! - `streams`: Stream catalog, histories, the event queue and snapshots
//! - `reactive`: Staleness tracking, the reaction cache and the scheduler
//! - `engine`: The host-facing engine tying everything together
//! - `host`: Running an engine on a tokio task
//!
//! # Example
//!
//! ```rust
//! use cadence_core::ast::{BinaryOp, TreeBuilder};
//! use cadence_core::{Engine, Value};
//!
//! // time() > 0ms
//! let mut b = TreeBuilder::new();
//! let time = b.stream("time");
//! let zero = b.measure(0.0, "ms");
//! let check = b.binary(time, BinaryOp::Greater, zero);
//! let tree = b.finish(check).unwrap();
//!
//! let mut engine = Engine::with_defaults(tree);
//! assert_eq!(engine.evaluate().unwrap(), Value::Boolean(false));
//!
//! // The first reading sets the clock's origin.
//! engine.add_stream_event("time", 1.0).unwrap();
//! engine.add_stream_event("time", 501.0).unwrap();
//! assert_eq!(engine.evaluate().unwrap(), Value::Boolean(true));
//! ```

pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod host;
pub mod reactive;
pub mod steps;
pub mod streams;
pub mod value;

pub use config::{ConflictPolicy, EngineConfig, UnavailablePolicy};
pub use engine::{AbortHandle, Engine, Pass, PassOutcome, PassReport};
pub use error::{ConfigError, EngineError, TreeError};
pub use eval::Terminal;
pub use host::EngineHost;
pub use streams::{EventLog, EventSender, StreamCatalog, StreamSpec};
pub use value::{Exception, ExceptionKind, Value};
