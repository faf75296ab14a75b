use std::time::Duration;

use courier_config::AgentHeader;

use super::*;
use crate::source::{Source, SourceSkeleton};
use courier_protocol::{Event, SourceStatus};
use tokio::sync::mpsc;

fn skeleton(events: mpsc::Sender<Event>, options: serde_json::Value) -> SourceSkeleton {
    SourceSkeleton {
        name: "gen".to_string(),
        agent: AgentHeader {
            tenant: "test".to_string(),
            environment: "testenv".to_string(),
            hostname: "host".to_string(),
            uuid: "uuid".to_string(),
        },
        enabled: true,
        autostart: true,
        options,
        events,
    }
}

#[test]
fn test_config_defaults() {
    let conf = RandomSourceConfig::default();
    assert_eq!(conf.interval, Duration::from_secs(1));
    assert_eq!(conf.payload_bytes, 64);
}

#[test]
fn test_config_from_options() {
    let (tx, _rx) = mpsc::channel(1);
    let options = serde_json::json!({ "interval": "25ms", "payload_bytes": 16 });
    let source = RandomSource::new(skeleton(tx, options)).unwrap();
    assert_eq!(source.conf.interval, Duration::from_millis(25));
    assert_eq!(source.conf.payload_bytes, 16);
}

#[test]
fn test_invalid_options_rejected() {
    let (tx, _rx) = mpsc::channel(1);
    let options = serde_json::json!({ "interval": "not a duration" });
    let err = RandomSource::new(skeleton(tx, options)).unwrap_err();
    assert!(matches!(err, SourceError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_generates_tagged_events() {
    let (tx, mut rx) = mpsc::channel(16);
    let options = serde_json::json!({ "interval": "5ms", "payload_bytes": 8 });
    let source = RandomSource::new(skeleton(tx, options)).unwrap();

    source.start().await.unwrap();
    assert_eq!(source.status(), SourceStatus::Running);

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no event within timeout")
        .expect("bus closed");

    match event {
        Event::Generic(generic) => {
            assert_eq!(generic.environment, "testenv");
            assert_eq!(generic.key, "testenv");
            let payload: serde_json::Value = serde_json::from_slice(&generic.value).unwrap();
            assert!(payload["data"].is_string());
        }
        other => panic!("expected generic event, got {:?}", other),
    }

    source.stop().await.unwrap();
    assert_eq!(source.status(), SourceStatus::Stopped);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (tx, mut rx) = mpsc::channel(64);
    let options = serde_json::json!({ "interval": "10ms" });
    let source = RandomSource::new(skeleton(tx, options)).unwrap();

    source.start().await.unwrap();
    source.start().await.unwrap();

    // a duplicate generator would double the rate; drain for a while and
    // make sure the sequence numbers stay strictly increasing by one
    let mut sequences = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if let Event::Generic(generic) = event {
            let payload: serde_json::Value = serde_json::from_slice(&generic.value).unwrap();
            sequences.push(payload["seq"].as_u64().unwrap());
        }
    }
    source.stop().await.unwrap();

    for pair in sequences.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "duplicate generator detected");
    }
}

#[tokio::test]
async fn test_stop_then_start_runs_again() {
    let (tx, _rx) = mpsc::channel(16);
    let options = serde_json::json!({ "interval": "1s" });
    let source = RandomSource::new(skeleton(tx, options)).unwrap();

    source.start().await.unwrap();
    source.stop().await.unwrap();
    assert_eq!(source.status(), SourceStatus::Stopped);

    source.start().await.unwrap();
    assert_eq!(source.status(), SourceStatus::Running);
    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_on_stopped_is_safe() {
    let (tx, _rx) = mpsc::channel(1);
    let source = RandomSource::new(skeleton(tx, serde_json::Value::Null)).unwrap();
    source.stop().await.unwrap();
    assert_eq!(source.status(), SourceStatus::Stopped);
}

#[tokio::test]
async fn test_emit_action() {
    let (tx, mut rx) = mpsc::channel(4);
    let source = RandomSource::new(skeleton(tx, serde_json::Value::Null)).unwrap();

    source.process("emit", b"").await.unwrap();
    let event = rx.try_recv().expect("emit should push one event");
    assert!(matches!(event, Event::Generic(_)));
    assert_eq!(source.metrics().snapshot().events_emitted, 1);
}
