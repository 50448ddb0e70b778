//! Async Host
//!
//! Runs an [`Engine`] on a tokio task so events can arrive from anywhere
//! while passes run one after another.
//!
//! # How Scheduling Works
//!
//! Every [`EngineHost::send`] queues the event on the engine and pokes the
//! task through a wake channel. The task drains all pending wake-ups before
//! it evaluates, so a burst of events costs one pass rather than one pass per
//! event. Root values are published on a `watch` channel, which keeps only
//! the newest value for slow readers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::streams::EventSender;
use crate::value::Value;

#[derive(Debug)]
enum Wake {
    Evaluate,
    Shutdown,
}

/// Handle to an engine running on its own task.
#[derive(Debug)]
pub struct EngineHost {
    events: EventSender,
    wake: mpsc::UnboundedSender<Wake>,
    values: watch::Receiver<Option<Value>>,
    task: JoinHandle<Engine>,
    clock: Option<JoinHandle<()>>,
}

impl EngineHost {
    /// Move `engine` onto a new task and run the first pass.
    pub fn spawn(engine: Engine) -> Self {
        let events = engine.event_sender();
        let (wake, mut wakes) = mpsc::unbounded_channel();
        let (publish, values) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut engine = engine;
            run_pass(&mut engine, &publish);
            while let Some(wake) = wakes.recv().await {
                if matches!(wake, Wake::Shutdown) {
                    break;
                }
                let mut shutdown = false;
                while let Ok(extra) = wakes.try_recv() {
                    shutdown |= matches!(extra, Wake::Shutdown);
                }
                run_pass(&mut engine, &publish);
                if shutdown {
                    break;
                }
            }
            engine.stop();
            engine
        });

        Self {
            events,
            wake,
            values,
            task,
            clock: None,
        }
    }

    /// Queue an event and schedule a pass.
    pub fn send(&self, stream: &str, value: impl Into<Value>) -> Result<(), EngineError> {
        self.events.send(stream, value.into())?;
        self.evaluate();
        Ok(())
    }

    /// Schedule a pass without a new event.
    pub fn evaluate(&self) {
        if self.wake.send(Wake::Evaluate).is_err() {
            debug!("engine task already finished");
        }
    }

    /// Root values. Holds `None` until the first pass finishes.
    pub fn values(&self) -> watch::Receiver<Option<Value>> {
        self.values.clone()
    }

    /// A sender that queues events without scheduling a pass.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Feed `time` with elapsed milliseconds every `period`.
    pub fn drive_clock(&mut self, period: Duration) {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
        let events = self.events.clone();
        let wake = self.wake.clone();
        self.clock = Some(tokio::spawn(async move {
            let origin = Instant::now();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let elapsed = origin.elapsed().as_secs_f64() * 1_000.0;
                if let Err(error) = events.send("time", Value::number(elapsed)) {
                    debug!(%error, "clock stopped");
                    break;
                }
                if wake.send(Wake::Evaluate).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop the task and hand the engine back.
    pub async fn shutdown(mut self) -> Result<Engine, EngineError> {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
        // An already finished task has dropped its receiver.
        let _ = self.wake.send(Wake::Shutdown);
        self.task.await.map_err(|error| {
            EngineError::invariant(format!("engine task failed: {error}"))
        })
    }
}

fn run_pass(engine: &mut Engine, publish: &watch::Sender<Option<Value>>) {
    match engine.evaluate() {
        Ok(value) => {
            publish.send_replace(Some(value));
        }
        Err(error) => warn!(%error, "pass failed"),
    }
}
