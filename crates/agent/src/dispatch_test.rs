use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use courier_config::AgentHeader;
use courier_link::LinkHandle;
use courier_protocol::{
    ActionDescriptor, AgentAction, AgentMessage, AgentStatus, Envelope, MessageKind, SchemaMap,
    SinkMessage, SourceMessage, SourceStatus,
};
use courier_sinks::transport::MemoryBroker;
use courier_sinks::{SinkSkeleton, StdoutSink};
use courier_sources::{DummySource, Source, SourceError, SourceSkeleton};

use super::*;
use crate::agent::{Agent, AgentChannels};

fn test_agent() -> (Arc<Agent>, mpsc::Receiver<Envelope>, AgentChannels) {
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (connected_tx, connected_rx) = watch::channel(true);
    // the receiver keeps reporting `true` after the sender is gone
    drop(connected_tx);

    let link = LinkHandle::from_parts(outbound_tx, connected_rx);
    let header = AgentHeader {
        tenant: "tenant-1".to_string(),
        environment: "test".to_string(),
        hostname: "host".to_string(),
        uuid: "uuid-1".to_string(),
    };
    let broker = MemoryBroker::new();
    let (agent, channels) = Agent::new(
        header,
        "secret".to_string(),
        link,
        broker.connector(),
        CancellationToken::new(),
    );
    (agent, outbound_rx, channels)
}

fn dummy_source(agent: &Arc<Agent>, name: &str) -> Arc<dyn Source> {
    Arc::new(DummySource::new(SourceSkeleton {
        name: name.to_string(),
        agent: agent.header().clone(),
        enabled: true,
        autostart: false,
        options: serde_json::Value::Null,
        events: agent.events_sender(),
    }))
}

fn source_envelope(name: &str, action: &str) -> Envelope {
    Envelope::wrap(MessageKind::Source, &SourceMessage::new("t", name, action)).unwrap()
}

/// Source whose stop always fails, for restart semantics.
#[derive(Debug)]
struct FlakySource {
    starts: AtomicU32,
    stops: AtomicU32,
    status: RwLock<SourceStatus>,
}

impl FlakySource {
    fn new() -> Self {
        Self {
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            status: RwLock::new(SourceStatus::Running),
        }
    }
}

#[async_trait]
impl Source for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }
    fn source_type(&self) -> &'static str {
        "flaky"
    }
    fn status(&self) -> SourceStatus {
        *self.status.read()
    }
    fn is_enabled(&self) -> bool {
        true
    }
    fn health_check(&self) -> bool {
        true
    }
    fn meta(&self) -> HashMap<String, String> {
        HashMap::new()
    }
    fn schema(&self) -> SchemaMap {
        SchemaMap::new()
    }
    fn available_actions(&self) -> HashMap<String, ActionDescriptor> {
        HashMap::new()
    }
    async fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }
    async fn start(&self) -> Result<(), SourceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.status.write() = SourceStatus::Running;
        Ok(())
    }
    async fn stop(&self) -> Result<(), SourceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::ChannelClosed {
            name: "flaky".to_string(),
        })
    }
    async fn process(&self, _action: &str, _payload: &[u8]) -> Result<(), SourceError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_source_start_and_stop_dispatch() {
    let (agent, _outbound, _channels) = test_agent();
    let source = dummy_source(&agent, "s1");
    agent.sources.write().insert("s1".to_string(), source.clone());

    dispatch(&agent, source_envelope("s1", "start")).await;
    assert_eq!(source.status(), SourceStatus::Running);

    dispatch(&agent, source_envelope("s1", "stop")).await;
    assert_eq!(source.status(), SourceStatus::Stopped);
}

#[tokio::test]
async fn test_unknown_source_is_logged_and_dropped() {
    let (agent, _outbound, _channels) = test_agent();
    // must not panic or reply
    dispatch(&agent, source_envelope("ghost", "start")).await;
}

#[tokio::test]
async fn test_restart_invokes_start_even_when_stop_fails() {
    let flaky = Arc::new(FlakySource::new());
    let source: Arc<dyn Source> = flaky.clone();
    restart_source(source).await;

    assert_eq!(flaky.stops.load(Ordering::SeqCst), 1);
    assert_eq!(flaky.starts.load(Ordering::SeqCst), 1);
    assert_eq!(flaky.status(), SourceStatus::Running);
}

#[tokio::test]
async fn test_restart_dispatch_restores_running() {
    let (agent, _outbound, _channels) = test_agent();
    let source = dummy_source(&agent, "s1");
    agent.sources.write().insert("s1".to_string(), source.clone());
    source.start().await.unwrap();

    dispatch(&agent, source_envelope("s1", "restart")).await;

    // restart runs on a worker task
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if source.status() == SourceStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "restart did not finish");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_status_action_sends_two_messages() {
    let (agent, mut outbound, _channels) = test_agent();
    let source = dummy_source(&agent, "s1");
    agent.sources.write().insert("s1".to_string(), source);

    let msg = AgentMessage::new("ctrl-token", "uuid-1", AgentAction::Status);
    let envelope = Envelope::wrap(MessageKind::Agent, &msg).unwrap();
    dispatch(&agent, envelope).await;

    let first = outbound.recv().await.unwrap();
    let first_msg: AgentMessage = first.open().unwrap();
    assert_eq!(first_msg.action, "status");
    assert_eq!(first_msg.payload, serde_json::json!("waiting_for_conf"));
    assert_eq!(first_msg.token, "tenant-1");

    let second = outbound.recv().await.unwrap();
    let second_msg: AgentMessage = second.open().unwrap();
    assert_eq!(second_msg.payload["sources"]["s1"], "stopped");
}

#[tokio::test]
async fn test_meta_action_aggregates_sources() {
    let (agent, mut outbound, _channels) = test_agent();
    agent
        .sources
        .write()
        .insert("s1".to_string(), dummy_source(&agent, "s1"));

    let msg = AgentMessage::new("t", "uuid-1", AgentAction::Meta);
    dispatch(&agent, Envelope::wrap(MessageKind::Agent, &msg).unwrap()).await;

    let reply: AgentMessage = outbound.recv().await.unwrap().open().unwrap();
    assert_eq!(reply.action, "meta");
    assert!(reply.payload.get("s1").is_some());
}

#[tokio::test]
async fn test_unknown_agent_action_sends_nothing() {
    let (agent, mut outbound, _channels) = test_agent();

    let msg = AgentMessage {
        token: "t".to_string(),
        uuid: "uuid-1".to_string(),
        action: "self_destruct".to_string(),
        payload: serde_json::Value::Null,
    };
    dispatch(&agent, Envelope::wrap(MessageKind::Agent, &msg).unwrap()).await;

    assert!(outbound.try_recv().is_err());
    assert_eq!(agent.status(), AgentStatus::WaitingForConf);
}

#[tokio::test]
async fn test_source_available_action_reply() {
    let (agent, mut outbound, _channels) = test_agent();
    agent
        .sources
        .write()
        .insert("s1".to_string(), dummy_source(&agent, "s1"));

    dispatch(&agent, source_envelope("s1", "available_action")).await;

    let reply = outbound.recv().await.unwrap();
    assert_eq!(reply.kind, MessageKind::Source);
    let msg: SourceMessage = reply.open().unwrap();
    assert_eq!(msg.name, "s1");
    assert!(msg.payload.get("restart").is_some());
}

#[tokio::test]
async fn test_open_ended_source_action_is_forwarded() {
    let (agent, _outbound, mut channels) = test_agent();

    let skeleton = SourceSkeleton {
        name: "gen".to_string(),
        agent: agent.header().clone(),
        enabled: true,
        autostart: false,
        options: serde_json::Value::Null,
        events: agent.events_sender(),
    };
    let source = courier_sources::build("random", skeleton).unwrap();
    agent.sources.write().insert("gen".to_string(), source);

    // "emit" is not a lifecycle action, it goes through process()
    dispatch(&agent, source_envelope("gen", "emit")).await;

    let event = channels.events_rx.try_recv().expect("emit should produce an event");
    assert!(event.environment().is_some());
}

#[tokio::test]
async fn test_sink_dispatch_lifecycle() {
    let (agent, _outbound, _channels) = test_agent();

    let (faults, _faults_rx) = mpsc::channel(4);
    let sink = Arc::new(StdoutSink::new(SinkSkeleton {
        name: "debug".to_string(),
        agent: agent.header().clone(),
        enabled: true,
        options: serde_json::Value::Null,
        faults,
    }));
    agent.sinks.write().insert("debug".to_string(), sink.clone());

    let start = SinkMessage {
        token: "t".to_string(),
        name: "debug".to_string(),
        action: "start".to_string(),
        payload: serde_json::Value::Null,
    };
    dispatch(&agent, Envelope::wrap(MessageKind::Sink, &start).unwrap()).await;
    assert_eq!(sink.status(), courier_protocol::SinkStatus::Running);

    let stop = SinkMessage {
        token: "t".to_string(),
        name: "debug".to_string(),
        action: "stop".to_string(),
        payload: serde_json::Value::Null,
    };
    dispatch(&agent, Envelope::wrap(MessageKind::Sink, &stop).unwrap()).await;
    assert_eq!(sink.status(), courier_protocol::SinkStatus::Stopped);
}
