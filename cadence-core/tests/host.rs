//! Tests for the tokio host.

mod common;

use std::time::Duration;

use cadence_core::{Engine, EngineHost, Value};
use pretty_assertions::assert_eq;

use common::{init_tracing, time_check};

#[tokio::test]
async fn host_publishes_committed_values() {
    init_tracing();
    let host = EngineHost::spawn(Engine::with_defaults(time_check()));
    let mut values = host.values();

    values
        .wait_for(|value| value == &Some(Value::Boolean(false)))
        .await
        .unwrap();

    host.send("time", 1.0).unwrap();
    host.send("time", 700.0).unwrap();
    values
        .wait_for(|value| value == &Some(Value::Boolean(true)))
        .await
        .unwrap();

    let engine = host.shutdown().await.unwrap();
    assert!(engine.is_stopped());
    assert_eq!(engine.latest(), Some(&Value::Boolean(true)));
}

#[tokio::test]
async fn bursts_of_events_coalesce_into_one_pass() {
    init_tracing();
    let host = EngineHost::spawn(Engine::with_defaults(time_check()));
    for reading in 0..10 {
        host.send("time", f64::from(reading) * 100.0 + 1.0).unwrap();
    }
    host.values()
        .wait_for(|value| value.is_some())
        .await
        .unwrap();

    let engine = host.shutdown().await.unwrap();
    // The first pass already sees every event; the queued wake-ups share one
    // more pass.
    let report = engine.last_report().unwrap();
    assert_eq!(report.pass, 2);
    assert_eq!(engine.event_log().len(), 10);
    assert_eq!(engine.latest(), Some(&Value::Boolean(true)));
}

#[tokio::test(start_paused = true)]
async fn clock_drives_the_time_stream() {
    init_tracing();
    let mut host = EngineHost::spawn(Engine::with_defaults(time_check()));
    host.drive_clock(Duration::from_millis(100));

    let mut values = host.values();
    values
        .wait_for(|value| value == &Some(Value::Boolean(true)))
        .await
        .unwrap();

    let engine = host.shutdown().await.unwrap();
    let time = engine.scheduler().registry().stream("time").unwrap();
    assert!(time.version() >= 2);
}

#[tokio::test]
async fn events_are_refused_after_shutdown() {
    init_tracing();
    let host = EngineHost::spawn(Engine::with_defaults(time_check()));
    let events = host.events();
    host.shutdown().await.unwrap();

    assert!(events.send("time", Value::number(1.0)).is_err());
}
