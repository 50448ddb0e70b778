//! External value sources.
//!
//! - [`catalog`]: which streams exist and the contract each one follows
//! - [`stream`]: one stream and its versioned history
//! - [`registry`]: all live streams, their subscribers, and pass snapshots
//! - [`events`]: the thread-safe event queue and the replayable event log

pub mod catalog;
pub mod events;
pub mod registry;
pub mod stream;

pub use catalog::{Emission, Shape, StreamCatalog, StreamSpec};
pub use events::{EventLog, EventSender, LoggedEvent, StreamEvent};
pub use registry::{Recorded, Snapshot, SnapshotEntry, StreamRegistry};
pub use stream::{HistoryEntry, Stream};
