//! Control protocol
//!
//! Message types exchanged with the controller: the outer [`Envelope`]
//! framing, the three inner message kinds, the action vocabularies and the
//! status enumerations.
//!
//! Actions travel as strings on the wire but are parsed into sealed enums
//! before dispatch; unknown actions stay strings and are either forwarded to
//! the instance's `process` hook (sources, sinks) or logged and dropped
//! (agent).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level routing tag of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Agent,
    Source,
    Sink,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Source => "source",
            Self::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Outer framing message on the controller link.
///
/// The payload is the JSON encoding of the inner message matching `kind`,
/// base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(with = "crate::b64")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap an inner message, serializing it to JSON payload bytes.
    pub fn wrap<T: Serialize>(kind: MessageKind, inner: &T) -> Result<Self, crate::ProtocolError> {
        let payload = serde_json::to_vec(inner).map_err(crate::ProtocolError::Encode)?;
        Ok(Self { kind, payload })
    }

    /// Decode the inner message.
    pub fn open<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::ProtocolError> {
        serde_json::from_slice(&self.payload).map_err(|source| crate::ProtocolError::Open {
            kind: self.kind,
            source,
        })
    }
}

/// Agent-level actions the controller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    /// Report agent status plus per-source statuses.
    Status,
    /// Apply a new source/sink configuration.
    Configure,
    /// Report the agent's and every source's available actions.
    AvailableAction,
    /// Report aggregated source metadata.
    Meta,
    /// Report aggregated source schemas.
    Schema,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Configure => "configure",
            Self::AvailableAction => "available_action",
            Self::Meta => "meta",
            Self::Schema => "schema",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Self::Status),
            "configure" => Some(Self::Configure),
            "available_action" => Some(Self::AvailableAction),
            "meta" => Some(Self::Meta),
            "schema" => Some(Self::Schema),
            _ => None,
        }
    }
}

/// Source lifecycle actions; anything else is forwarded to the source's
/// `process` hook verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    Start,
    Stop,
    Restart,
    AvailableAction,
}

impl SourceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::AvailableAction => "available_action",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "available_action" => Some(Self::AvailableAction),
            _ => None,
        }
    }
}

/// Sink lifecycle actions; anything else is forwarded to the sink's
/// `process` hook verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAction {
    Start,
    Stop,
    /// Ask the batching producers to flush their current batches.
    Flush,
}

impl SinkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Flush => "flush",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "flush" => Some(Self::Flush),
            _ => None,
        }
    }
}

/// Agent lifecycle status, reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    WaitingForConf,
    Configuring,
    Running,
    OnError,
    Stopping,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForConf => "waiting_for_conf",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::OnError => "on_error",
            Self::Stopping => "stopping",
        }
    }
}

/// Source lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Running,
    Stopped,
    OnError,
    /// Started but still discovering metadata/schema.
    WaitingForMeta,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::OnError => "on_error",
            Self::WaitingForMeta => "waiting_for_meta",
        }
    }
}

/// Sink lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkStatus {
    Running,
    Stopped,
    OnError,
}

impl SinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::OnError => "on_error",
        }
    }
}

/// Inner message addressed to the agent itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Tenant token on replies, controller-issued token on requests.
    #[serde(default)]
    pub token: String,

    /// Agent uuid.
    #[serde(default)]
    pub uuid: String,

    /// Action name; see [`AgentAction`].
    pub action: String,

    /// Action-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AgentMessage {
    pub fn new(token: impl Into<String>, uuid: impl Into<String>, action: AgentAction) -> Self {
        Self {
            token: token.into(),
            uuid: uuid.into(),
            action: action.as_str().to_string(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a payload, serializing it to JSON.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, crate::ProtocolError> {
        self.payload = serde_json::to_value(payload).map_err(crate::ProtocolError::Encode)?;
        Ok(self)
    }
}

/// Inner message addressed to a named source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    #[serde(default)]
    pub token: String,

    /// Name of the target source instance.
    pub name: String,

    /// Action name; see [`SourceAction`].
    pub action: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SourceMessage {
    pub fn new(token: impl Into<String>, name: impl Into<String>, action: &str) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            action: action.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, crate::ProtocolError> {
        self.payload = serde_json::to_value(payload).map_err(crate::ProtocolError::Encode)?;
        Ok(self)
    }
}

/// Inner message addressed to a named sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkMessage {
    #[serde(default)]
    pub token: String,

    /// Name of the target sink instance.
    pub name: String,

    /// Action name; see [`SinkAction`].
    pub action: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Describes one action a component supports, for controller discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Human-readable description of what the action does.
    pub description: String,
}

impl ActionDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Schema of one column as discovered by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Source-native type name (e.g. `varchar(64)`).
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub nullable: bool,
}

/// Column name to column schema.
pub type TableSchema = HashMap<String, ColumnSchema>;

/// Database name to table name to columns.
pub type SchemaMap = HashMap<String, HashMap<String, TableSchema>>;

#[cfg(test)]
#[path = "control_test.rs"]
mod control_test;
