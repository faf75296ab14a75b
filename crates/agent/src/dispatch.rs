//! Control message dispatcher
//!
//! A single reader on the link's inbound channel. Each envelope is decoded
//! and dispatched over the sealed action enums; open-ended actions fall
//! through to the instance's `process` hook. Quick handlers run inline;
//! Configure and Restart go to worker tasks so the inbound lane never
//! stalls behind them.

use std::sync::Arc;

use tokio::sync::mpsc;

use courier_protocol::{
    AgentAction, AgentMessage, Envelope, MessageKind, SinkAction, SinkMessage, SourceAction,
    SourceMessage,
};
use courier_sinks::Sink;
use courier_sources::Source;

use crate::agent::Agent;
use crate::configure;

/// Run the dispatcher until the inbound channel closes or shutdown fires.
pub async fn run(agent: Arc<Agent>, mut inbound: mpsc::Receiver<Envelope>) {
    loop {
        tokio::select! {
            envelope = inbound.recv() => match envelope {
                Some(envelope) => dispatch(&agent, envelope).await,
                None => {
                    tracing::debug!("inbound channel closed, dispatcher exiting");
                    return;
                }
            },
            _ = agent.cancel().cancelled() => {
                tracing::debug!("dispatcher cancelled");
                return;
            }
        }
    }
}

/// Dispatch one envelope by kind.
pub(crate) async fn dispatch(agent: &Arc<Agent>, envelope: Envelope) {
    match envelope.kind {
        MessageKind::Agent => match envelope.open::<AgentMessage>() {
            Ok(msg) => dispatch_agent(agent, msg).await,
            Err(e) => tracing::error!(error = %e, "undecodable agent message"),
        },
        MessageKind::Source => match envelope.open::<SourceMessage>() {
            Ok(msg) => {
                tracing::debug!(name = %msg.name, action = %msg.action, "got source message, dispatching");
                dispatch_source(agent, msg).await;
            }
            Err(e) => tracing::error!(error = %e, "undecodable source message"),
        },
        MessageKind::Sink => match envelope.open::<SinkMessage>() {
            Ok(msg) => {
                tracing::debug!(name = %msg.name, action = %msg.action, "got sink message, dispatching");
                dispatch_sink(agent, msg).await;
            }
            Err(e) => tracing::error!(error = %e, "undecodable sink message"),
        },
    }
}

async fn dispatch_agent(agent: &Arc<Agent>, msg: AgentMessage) {
    match AgentAction::parse(&msg.action) {
        Some(AgentAction::Status) => {
            if let Err(e) = agent.send_status().await {
                tracing::warn!(error = %e, "status report failed");
            }
        }
        Some(AgentAction::Configure) => {
            // reconfiguration stops and starts instances; keep it off the
            // inbound lane
            let agent = Arc::clone(agent);
            let payload = msg.payload;
            tokio::spawn(async move {
                let _ = configure::apply(&agent, payload).await;
            });
        }
        Some(AgentAction::AvailableAction) => {
            if let Err(e) = agent.send_available_actions().await {
                tracing::warn!(error = %e, "available-action report failed");
            }
        }
        Some(AgentAction::Meta) => {
            if let Err(e) = agent.send_meta().await {
                tracing::warn!(error = %e, "meta report failed");
            }
        }
        Some(AgentAction::Schema) => {
            if let Err(e) = agent.send_schema().await {
                tracing::warn!(error = %e, "schema report failed");
            }
        }
        None => {
            // not fatal: newer controllers may speak a larger vocabulary
            tracing::error!(action = %msg.action, "agent message with unhandled action");
        }
    }
}

async fn dispatch_source(agent: &Arc<Agent>, msg: SourceMessage) {
    let Some(source) = agent.source(&msg.name) else {
        tracing::debug!(name = %msg.name, currents = ?agent.source_names(), "source name not found");
        return;
    };

    match SourceAction::parse(&msg.action) {
        Some(SourceAction::Start) => {
            if let Err(e) = source.start().await {
                tracing::error!(source = %msg.name, error = %e, "source start failed");
            }
        }
        Some(SourceAction::Stop) => {
            if let Err(e) = source.stop().await {
                tracing::error!(source = %msg.name, error = %e, "source stop failed");
            }
        }
        Some(SourceAction::Restart) => {
            // stop then start, both attempted even if the stop errors; off
            // the inbound lane since a source stop can take a while
            tokio::spawn(restart_source(source));
        }
        Some(SourceAction::AvailableAction) => {
            if let Err(e) = send_source_actions(agent, &msg, source.as_ref()).await {
                tracing::warn!(source = %msg.name, error = %e, "available-action reply failed");
            }
        }
        None => {
            tracing::debug!(source = %msg.name, action = %msg.action, "forwarding action to source");
            let payload = payload_bytes(&msg.payload);
            if let Err(e) = source.process(&msg.action, &payload).await {
                tracing::error!(source = %msg.name, action = %msg.action, error = %e, "source action failed");
            }
        }
    }
}

/// Stop then start; the second call runs regardless of the first's outcome.
pub(crate) async fn restart_source(source: Arc<dyn Source>) {
    if let Err(e) = source.stop().await {
        tracing::error!(source = %source.name(), error = %e, "stop failed during restart");
    }
    if let Err(e) = source.start().await {
        tracing::error!(source = %source.name(), error = %e, "start failed during restart");
    }
}

async fn send_source_actions(
    agent: &Arc<Agent>,
    msg: &SourceMessage,
    source: &dyn Source,
) -> Result<(), crate::AgentError> {
    let reply = SourceMessage::new(&msg.token, &msg.name, SourceAction::AvailableAction.as_str())
        .with_payload(&source.available_actions())?;
    agent.send_wrapped(MessageKind::Source, &reply).await
}

async fn dispatch_sink(agent: &Arc<Agent>, msg: SinkMessage) {
    let Some(sink) = agent.sink(&msg.name) else {
        tracing::debug!(name = %msg.name, currents = ?agent.sink_names(), "sink name not found");
        return;
    };

    match SinkAction::parse(&msg.action) {
        Some(SinkAction::Start) => {
            if let Err(e) = sink.start().await {
                tracing::error!(sink = %msg.name, error = %e, "sink start failed");
            }
        }
        Some(SinkAction::Stop) => {
            if let Err(e) = sink.stop().await {
                tracing::error!(sink = %msg.name, error = %e, "sink stop failed");
            }
        }
        Some(SinkAction::Flush) => {
            if let Err(e) = sink.process(SinkAction::Flush.as_str(), &[]).await {
                tracing::error!(sink = %msg.name, error = %e, "sink flush failed");
            }
        }
        None => {
            let payload = payload_bytes(&msg.payload);
            if let Err(e) = sink.process(&msg.action, &payload).await {
                tracing::error!(sink = %msg.name, action = %msg.action, error = %e, "sink action failed");
            }
        }
    }
}

/// Open-ended action payloads travel to `process` as raw JSON bytes.
fn payload_bytes(payload: &serde_json::Value) -> Vec<u8> {
    if payload.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(payload).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
