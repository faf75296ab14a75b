//! The agent runtime
//!
//! One [`Agent`] value exists per process. It owns the source and sink
//! registries, the event bus between them, and the fault channel sinks use
//! to report fatal failures. Sources and sinks never see the agent; they
//! get the read-only identity header and their channel endpoints, and all
//! replies to the controller go through the link's send queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_config::{AgentHeader, SinkEntry, SourceEntry};
use courier_link::LinkHandle;
use courier_protocol::{
    ActionDescriptor, AgentAction, AgentMessage, AgentStatus, Envelope, Event, MessageKind,
};
use courier_sinks::{BrokerConnector, Sink, SinkFault};
use courier_sources::Source;

use crate::configure;
use crate::dispatch;
use crate::error::AgentError;

/// Capacity of the event bus between sources and the fan-out stage.
pub const EVENT_BUS_SIZE: usize = 10_000;

/// Capacity of the sink fault channel.
const FAULT_QUEUE_SIZE: usize = 64;

/// Receive ends of the agent's internal channels, fed to
/// [`Agent::spawn_runtime`].
pub struct AgentChannels {
    pub events_rx: mpsc::Receiver<Event>,
    pub faults_rx: mpsc::Receiver<SinkFault>,
}

/// The per-process agent value.
pub struct Agent {
    pub(crate) header: AgentHeader,
    pub(crate) secret_key: String,

    pub(crate) status: RwLock<AgentStatus>,

    pub(crate) sources: RwLock<HashMap<String, Arc<dyn Source>>>,
    pub(crate) sinks: RwLock<HashMap<String, Arc<dyn Sink>>>,

    // the configuration entries the registries were built from, kept for
    // diffing on the next Configure
    pub(crate) applied_sources: RwLock<HashMap<String, SourceEntry>>,
    pub(crate) applied_sinks: RwLock<HashMap<String, SinkEntry>>,

    // serializes concurrent Configure requests
    pub(crate) configure_gate: tokio::sync::Mutex<()>,

    pub(crate) link: LinkHandle,
    pub(crate) events_tx: mpsc::Sender<Event>,
    pub(crate) faults_tx: mpsc::Sender<SinkFault>,
    pub(crate) connector: Arc<dyn BrokerConnector>,
    pub(crate) cancel: CancellationToken,
}

impl Agent {
    /// Create the agent and its internal channels.
    pub fn new(
        header: AgentHeader,
        secret_key: String,
        link: LinkHandle,
        connector: Arc<dyn BrokerConnector>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, AgentChannels) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUS_SIZE);
        let (faults_tx, faults_rx) = mpsc::channel(FAULT_QUEUE_SIZE);

        let agent = Arc::new(Self {
            header,
            secret_key,
            status: RwLock::new(AgentStatus::WaitingForConf),
            sources: RwLock::new(HashMap::new()),
            sinks: RwLock::new(HashMap::new()),
            applied_sources: RwLock::new(HashMap::new()),
            applied_sinks: RwLock::new(HashMap::new()),
            configure_gate: tokio::sync::Mutex::new(()),
            link,
            events_tx,
            faults_tx,
            connector,
            cancel,
        });

        (agent, AgentChannels { events_rx, faults_rx })
    }

    /// Spawn the dispatcher, the event fan-out and the fault listener.
    pub fn spawn_runtime(
        self: &Arc<Self>,
        channels: AgentChannels,
        inbound: mpsc::Receiver<Envelope>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(dispatch::run(Arc::clone(self), inbound)),
            tokio::spawn(fan_out(Arc::clone(self), channels.events_rx)),
            tokio::spawn(fault_loop(Arc::clone(self), channels.faults_rx)),
        ]
    }

    /// Read-only identity header.
    pub fn header(&self) -> &AgentHeader {
        &self.header
    }

    /// Shutdown/cancellation token shared with every worker.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current agent status.
    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: AgentStatus) {
        let previous = {
            let mut guard = self.status.write();
            std::mem::replace(&mut *guard, status)
        };
        if previous != status {
            tracing::info!(from = previous.as_str(), to = status.as_str(), "agent status");
        }
    }

    /// Write end of the event bus, cloned into source skeletons.
    pub fn events_sender(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.read().get(name).cloned()
    }

    /// Look up a sink by name.
    pub fn sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        self.sinks.read().get(name).cloned()
    }

    /// Names of the currently configured sources.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().keys().cloned().collect()
    }

    /// Names of the currently configured sinks.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().keys().cloned().collect()
    }

    /// Apply a Configure payload (also used for the startup file config).
    pub async fn apply_configuration(
        self: &Arc<Self>,
        payload: serde_json::Value,
    ) -> Result<(), AgentError> {
        configure::apply(self, payload).await
    }

    /// The registration frame for this agent; see [`registration_envelope`].
    pub fn register_envelope(&self) -> Result<Envelope, AgentError> {
        registration_envelope(&self.header, &self.secret_key)
    }

    pub(crate) async fn send_wrapped<T: Serialize>(
        &self,
        kind: MessageKind,
        inner: &T,
    ) -> Result<(), AgentError> {
        let envelope = Envelope::wrap(kind, inner)?;
        self.link.send(envelope).await?;
        Ok(())
    }

    fn reply(&self, action: AgentAction) -> AgentMessage {
        AgentMessage::new(&self.header.tenant, &self.header.uuid, action)
    }

    /// Report agent status plus per-component statuses, two messages.
    pub async fn send_status(&self) -> Result<(), AgentError> {
        self.send_agent_status().await?;
        self.send_component_status().await
    }

    async fn send_agent_status(&self) -> Result<(), AgentError> {
        let msg = self
            .reply(AgentAction::Status)
            .with_payload(&self.status())?;
        self.send_wrapped(MessageKind::Agent, &msg).await
    }

    async fn send_component_status(&self) -> Result<(), AgentError> {
        let sources: HashMap<String, &'static str> = self
            .sources
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), source.status().as_str()))
            .collect();
        let sinks: HashMap<String, &'static str> = self
            .sinks
            .read()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.status().as_str()))
            .collect();

        let msg = self.reply(AgentAction::Status).with_payload(&serde_json::json!({
            "sources": sources,
            "sinks": sinks,
        }))?;
        self.send_wrapped(MessageKind::Agent, &msg).await
    }

    /// Report aggregated source metadata.
    pub async fn send_meta(&self) -> Result<(), AgentError> {
        let sources: Vec<(String, Arc<dyn Source>)> = self
            .sources
            .read()
            .iter()
            .map(|(n, s)| (n.clone(), Arc::clone(s)))
            .collect();

        let meta: HashMap<String, HashMap<String, String>> = sources
            .into_iter()
            .map(|(name, source)| (name, source.meta()))
            .collect();

        let msg = self.reply(AgentAction::Meta).with_payload(&meta)?;
        self.send_wrapped(MessageKind::Agent, &msg).await
    }

    /// Report aggregated source schemas.
    pub async fn send_schema(&self) -> Result<(), AgentError> {
        let sources: Vec<(String, Arc<dyn Source>)> = self
            .sources
            .read()
            .iter()
            .map(|(n, s)| (n.clone(), Arc::clone(s)))
            .collect();

        let schemas: HashMap<String, courier_protocol::SchemaMap> = sources
            .into_iter()
            .map(|(name, source)| (name, source.schema()))
            .collect();

        let msg = self.reply(AgentAction::Schema).with_payload(&schemas)?;
        self.send_wrapped(MessageKind::Agent, &msg).await
    }

    /// Report the agent's own action set plus each source's, two messages.
    pub async fn send_available_actions(&self) -> Result<(), AgentError> {
        let msg = self
            .reply(AgentAction::AvailableAction)
            .with_payload(&agent_actions())?;
        self.send_wrapped(MessageKind::Agent, &msg).await?;

        let sources: Vec<(String, Arc<dyn Source>)> = self
            .sources
            .read()
            .iter()
            .map(|(n, s)| (n.clone(), Arc::clone(s)))
            .collect();
        let per_source: HashMap<String, HashMap<String, ActionDescriptor>> = sources
            .into_iter()
            .map(|(name, source)| (name, source.available_actions()))
            .collect();

        let msg = self
            .reply(AgentAction::AvailableAction)
            .with_payload(&per_source)?;
        self.send_wrapped(MessageKind::Agent, &msg).await
    }

    pub(crate) async fn handle_sink_fault(&self, fault: SinkFault) {
        tracing::error!(sink = %fault.sink, error = %fault.error, "sink reported fatal failure");

        // the sink set itself OnError; tell the controller what happened
        let mut detail = serde_json::Map::new();
        detail.insert(
            fault.sink.clone(),
            serde_json::json!({ "status": "on_error", "error": fault.error }),
        );
        let report = self
            .reply(AgentAction::Status)
            .with_payload(&serde_json::json!({ "sinks": detail }));
        match report {
            Ok(msg) => {
                if let Err(e) = self.send_wrapped(MessageKind::Agent, &msg).await {
                    tracing::debug!(error = %e, "unable to report sink fault to controller");
                }
            }
            Err(e) => tracing::debug!(error = %e, "unable to encode sink fault report"),
        }

        if let Err(e) = self.send_status().await {
            tracing::debug!(error = %e, "unable to report status after sink fault");
        }
    }

    /// Orderly shutdown: stop sources, then sinks (they flush), under the
    /// caller's deadline.
    pub async fn shutdown(&self) {
        self.set_status(AgentStatus::Stopping);
        self.cancel.cancel();

        let sources: Vec<Arc<dyn Source>> = self.sources.read().values().cloned().collect();
        for source in sources {
            if let Err(e) = source.stop().await {
                tracing::warn!(source = %source.name(), error = %e, "source stop failed during shutdown");
            }
        }

        let sinks: Vec<Arc<dyn Sink>> = self.sinks.read().values().cloned().collect();
        for sink in sinks {
            if let Err(e) = sink.stop().await {
                tracing::warn!(sink = %sink.name(), error = %e, "sink stop failed during shutdown");
            }
        }

        tracing::info!("agent shutdown complete");
    }
}

/// The registration frame sent on every (re)connection: the shared secret
/// as token, plus the waiting-for-configuration status that doubles as the
/// config request.
pub fn registration_envelope(
    header: &AgentHeader,
    secret_key: &str,
) -> Result<Envelope, AgentError> {
    let msg = AgentMessage::new(secret_key, &header.uuid, AgentAction::Status)
        .with_payload(&AgentStatus::WaitingForConf)?;
    Ok(Envelope::wrap(MessageKind::Agent, &msg)?)
}

/// The agent's own controller-visible actions.
fn agent_actions() -> HashMap<String, ActionDescriptor> {
    let mut actions = HashMap::new();
    actions.insert(
        "status".to_string(),
        ActionDescriptor::new("report agent and component statuses"),
    );
    actions.insert(
        "configure".to_string(),
        ActionDescriptor::new("apply a new source/sink configuration"),
    );
    actions.insert(
        "meta".to_string(),
        ActionDescriptor::new("report aggregated source metadata"),
    );
    actions.insert(
        "schema".to_string(),
        ActionDescriptor::new("report aggregated source schemas"),
    );
    actions.insert(
        "available_action".to_string(),
        ActionDescriptor::new("report supported actions"),
    );
    actions
}

/// Forward each bus event to every running sink's input, blocking on
/// backpressure. A closed bus is end-of-stream, not an error.
async fn fan_out(agent: Arc<Agent>, mut events: mpsc::Receiver<Event>) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("event bus closed, fan-out draining out");
                    return;
                };

                let targets: Vec<(String, mpsc::Sender<Event>)> = agent
                    .sinks
                    .read()
                    .iter()
                    .filter(|(_, sink)| sink.status() == courier_protocol::SinkStatus::Running)
                    .map(|(name, sink)| (name.clone(), sink.input()))
                    .collect();

                for (name, input) in targets {
                    if input.send(event.clone()).await.is_err() {
                        tracing::warn!(sink = %name, "sink input closed, event not forwarded");
                    }
                }
            }
            _ = agent.cancel.cancelled() => {
                tracing::debug!("fan-out cancelled");
                return;
            }
        }
    }
}

/// React to fatal sink failures.
async fn fault_loop(agent: Arc<Agent>, mut faults: mpsc::Receiver<SinkFault>) {
    loop {
        tokio::select! {
            fault = faults.recv() => match fault {
                Some(fault) => agent.handle_sink_fault(fault).await,
                None => return,
            },
            _ = agent.cancel.cancelled() => return,
        }
    }
}
