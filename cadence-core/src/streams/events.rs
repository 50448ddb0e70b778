//! Event queue and event log.
//!
//! External sources never touch the registry directly. They push
//! [`StreamEvent`]s through an [`EventSender`]; the scheduler drains the
//! queue only when a pass starts, so events arriving mid-pass wait for the
//! next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::catalog::StreamCatalog;
use crate::error::EngineError;
use crate::value::Value;

/// A value queued for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Catalog name of the stream.
    pub stream: Arc<str>,
    pub value: Value,
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<StreamEvent>>,
    closed: AtomicBool,
}

/// Thread-safe handle for pushing stream events.
///
/// Events are validated against the catalog on send, so a bad event is
/// reported to its source rather than dropped later.
#[derive(Debug, Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
    catalog: Arc<StreamCatalog>,
}

impl EventSender {
    /// Queue `value` for `stream` until the next pass starts.
    ///
    /// Fails if the engine stopped, the stream is unknown, or the value does
    /// not fit the stream's shape.
    pub fn send(&self, stream: &str, value: Value) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EngineError::Stopped);
        }
        let spec = self
            .catalog
            .get(stream)
            .ok_or_else(|| EngineError::UnknownStream(stream.to_string()))?;
        if !spec.shape.accepts(&value) {
            return Err(EngineError::StreamContract {
                stream: stream.to_string(),
                expected: spec.shape.describe(),
                found: value.to_string(),
            });
        }
        self.shared.queue.lock().push_back(StreamEvent {
            stream: Arc::clone(&spec.name),
            value,
        });
        Ok(())
    }

    /// Whether the engine stopped taking events.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// The receiving side, owned by the scheduler.
#[derive(Debug)]
pub(crate) struct EventQueue {
    shared: Arc<Shared>,
    catalog: Arc<StreamCatalog>,
}

impl EventQueue {
    pub(crate) fn new(catalog: Arc<StreamCatalog>) -> Self {
        Self {
            shared: Arc::default(),
            catalog,
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        EventSender {
            shared: Arc::clone(&self.shared),
            catalog: Arc::clone(&self.catalog),
        }
    }

    /// Everything queued so far, in arrival order.
    pub(crate) fn drain(&self) -> Vec<StreamEvent> {
        self.shared.queue.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Drop queued events and refuse new ones.
    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queue.lock().clear();
    }
}

/// One recorded stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    /// Position in recording order across all streams.
    pub sequence: u64,
    pub stream: String,
    /// The value as the stream recorded it.
    pub input: Value,
}

/// Retained stream history in recording order, exportable as MessagePack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub events: Vec<LoggedEvent>,
}

impl EventLog {
    /// Serialize to MessagePack with named fields.
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize a log written by [`EventLog::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue {
        EventQueue::new(Arc::new(StreamCatalog::builtin()))
    }

    #[test]
    fn sent_events_drain_in_order() {
        let queue = queue();
        let sender = queue.sender();
        sender.send("keyboard", Value::text("a")).unwrap();
        sender.clone().send("time", Value::number(5.0)).unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(&*drained[0].stream, "keyboard");
        assert_eq!(drained[1].value, Value::number(5.0));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn send_validates_against_catalog() {
        let queue = queue();
        let sender = queue.sender();
        assert!(matches!(
            sender.send("weather", Value::number(1.0)),
            Err(EngineError::UnknownStream(_))
        ));
        assert!(matches!(
            sender.send("mouse-button", Value::number(1.0)),
            Err(EngineError::StreamContract { .. })
        ));
    }

    #[test]
    fn closed_queue_refuses_events() {
        let queue = queue();
        let sender = queue.sender();
        sender.send("keyboard", Value::text("a")).unwrap();
        queue.close();
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send("keyboard", Value::text("b")),
            Err(EngineError::Stopped)
        ));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn event_log_survives_messagepack() {
        let log = EventLog {
            events: vec![
                LoggedEvent {
                    sequence: 0,
                    stream: "time".into(),
                    input: Value::measure(1.0, "ms"),
                },
                LoggedEvent {
                    sequence: 1,
                    stream: "mouse-position".into(),
                    input: Value::structure([("x", Value::number(3.0)), ("y", Value::number(4.0))]),
                },
            ],
        };
        let bytes = log.encode().unwrap();
        assert_eq!(EventLog::decode(&bytes).unwrap(), log);
    }
}
