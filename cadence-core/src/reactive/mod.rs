//! Reactive Machinery
//!
//! Everything that makes passes incremental.
//!
//! # Concepts
//!
//! ## Staleness
//!
//! Stream events mark the nodes that read the stream, plus everything above
//! them, as dirty. References to binds on that path become maybe-dirty and
//! are verified lazily during the next pass.
//!
//! ## Reaction Cache
//!
//! The last committed value of every evaluated node. A node that is still
//! clean when a pass reaches it pushes its cached value instead of running.
//!
//! ## Scheduler
//!
//! Owns the streams, the cache and the staleness graph, and moves them from
//! one pass to the next: folding queued events in at pass start, applying
//! the pass record at commit.
//!
//! ## Listeners
//!
//! Callbacks notified with each committed pass.

mod cache;
mod listener;
mod scheduler;
mod staleness;

pub use cache::{CacheEntry, ReactionCache};
pub use listener::{Listener, ListenerId, Listeners};
pub use scheduler::Scheduler;
pub use staleness::{DirtyState, StaleGraph};
