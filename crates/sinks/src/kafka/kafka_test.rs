use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use courier_config::AgentHeader;
use courier_protocol::{Event, GenericEvent, SinkStatus, TransportMessage};

use super::*;
use crate::common::SinkFault;
use crate::sink::{Sink, SinkSkeleton};
use crate::transport::MemoryBroker;

fn skeleton(options: serde_json::Value, faults: mpsc::Sender<SinkFault>) -> SinkSkeleton {
    SinkSkeleton {
        name: "k1".to_string(),
        agent: AgentHeader::default(),
        enabled: true,
        options,
        faults,
    }
}

fn transport_event(key_len: usize, value_len: usize) -> Event {
    Event::Transport(TransportMessage {
        topic: "audit".to_string(),
        key: vec![b'k'; key_len],
        value: vec![b'v'; value_len],
    })
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn test_config_defaults() {
    let conf = KafkaSinkConfig::default();
    assert_eq!(conf.max_message_bytes, 1_000_000);
    assert_eq!(conf.nb_producer, 1);
    assert!(conf.topic.is_empty());
    assert!(conf.secret.is_empty());
}

#[test]
fn test_invalid_threshold_rejected() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "maxmessagebytes": 0 });
    let err = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap_err();
    assert!(err.to_string().contains("maxmessagebytes"));
}

#[test]
fn test_malformed_options_rejected() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "nbproducer": "three" });
    let err = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap_err();
    assert!(matches!(err, crate::SinkError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_lifecycle_is_idempotent() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "topic": "t" });
    let sink = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap();

    assert_eq!(sink.status(), SinkStatus::Stopped);
    sink.start().await.unwrap();
    sink.start().await.unwrap();
    assert_eq!(sink.status(), SinkStatus::Running);

    sink.stop().await.unwrap();
    sink.stop().await.unwrap();
    assert_eq!(sink.status(), SinkStatus::Stopped);

    // and the pipeline comes back after a restart
    sink.start().await.unwrap();
    assert_eq!(sink.status(), SinkStatus::Running);
    sink.stop().await.unwrap();
}

#[tokio::test]
async fn test_batch_boundaries_respect_byte_cap() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "topic": "t", "maxmessagebytes": 1000, "nbproducer": 1 });
    let sink = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap();
    sink.start().await.unwrap();

    // wire size = 26 overhead + 4 key + 270 value = 300 bytes each
    let input = sink.input();
    for _ in 0..10 {
        input.send(transport_event(4, 270)).await.unwrap();
    }

    // three full batches overflow out while the tenth record waits
    wait_until(|| broker.batches().len() == 3).await;
    sink.stop().await.unwrap();

    let batches = broker.batches();
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);

    for batch in &batches {
        let total: usize = batch.iter().map(|r| r.wire_size()).sum();
        assert!(total <= 1000, "batch of {total} bytes exceeds the cap");
        for record in batch {
            assert!(record.wire_size() <= 1000);
        }
    }
}

#[tokio::test]
async fn test_oversize_event_dropped_with_counter() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "topic": "t", "maxmessagebytes": 100, "nbproducer": 1 });
    let sink = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap();
    sink.start().await.unwrap();

    let input = sink.input();

    // 200 bytes of payload serialize well past the 100-byte threshold
    input
        .send(Event::Generic(GenericEvent {
            environment: "prod".to_string(),
            key: "prod".to_string(),
            value: vec![b'x'; 200],
            timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, 0).unwrap(),
        }))
        .await
        .unwrap();

    // a small record that fits; the age-based ticker flushes it out
    input.send(transport_event(1, 10)).await.unwrap();

    wait_until(|| !broker.records().is_empty()).await;
    sink.stop().await.unwrap();

    let records = broker.records();
    assert_eq!(records.len(), 1, "oversize event must not reach the broker");
    assert_eq!(records[0].value, vec![b'v'; 10]);

    let snapshot = sink.metrics().snapshot();
    assert_eq!(snapshot.oversize_dropped, 1);
    assert_eq!(snapshot.events_received, 2);
    assert_eq!(snapshot.records_delivered, 1);
}

#[tokio::test]
async fn test_retry_exhaustion_transitions_to_on_error() {
    let broker = MemoryBroker::new();
    broker.fail_all(true);

    let (faults, mut faults_rx) = mpsc::channel(4);
    let options = serde_json::json!({ "topic": "t", "maxmessagebytes": 1000, "nbproducer": 1 });
    let sink = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap();
    sink.start().await.unwrap();

    sink.input().send(transport_event(1, 50)).await.unwrap();
    sink.process("flush", b"").await.unwrap();

    let fault = tokio::time::timeout(Duration::from_secs(5), faults_rx.recv())
        .await
        .expect("no fault within timeout")
        .expect("fault channel closed");

    assert_eq!(fault.sink, "k1");
    assert!(fault.error.contains("21 attempts"), "got: {}", fault.error);
    assert_eq!(sink.status(), SinkStatus::OnError);
    assert!(!sink.health_check());

    // one initial attempt plus twenty retries, nothing delivered
    assert_eq!(broker.send_calls(), 21);
    assert!(broker.batches().is_empty());
    assert_eq!(sink.metrics().snapshot().retries, 20);

    // the sink still stops cleanly so Configure can replace it
    sink.stop().await.unwrap();
}

#[tokio::test]
async fn test_flush_barrier_delivers_partial_batch() {
    let broker = MemoryBroker::new();
    let (faults, _rx) = mpsc::channel(4);
    let options = serde_json::json!({ "topic": "t", "maxmessagebytes": 10000, "nbproducer": 1 });
    let sink = KafkaSink::new(skeleton(options, faults), broker.connector()).unwrap();
    sink.start().await.unwrap();

    sink.input().send(transport_event(1, 10)).await.unwrap();
    sink.input().send(transport_event(1, 10)).await.unwrap();

    // both records are queued once the consumer has seen them; the barrier
    // then forces the partial batch out ahead of the ticker
    wait_until(|| sink.metrics().snapshot().events_received == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    sink.process("flush", b"").await.unwrap();

    wait_until(|| broker.batches().len() == 1).await;
    assert_eq!(broker.batches()[0].len(), 2);

    sink.stop().await.unwrap();
}
