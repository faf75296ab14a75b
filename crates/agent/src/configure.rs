//! Configuration apply
//!
//! Diffs a Configure payload against the currently applied entries:
//! removed instances are stopped then dropped, added ones are constructed
//! via the factories and started, changed ones are stopped, reconstructed
//! and started. New instances are built before anything is torn down, so a
//! factory error leaves the running set untouched. The registry swap itself
//! happens under the write locks; readers see either the old full set or
//! the new one, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use courier_config::{SinkEntry, SinksConfig, SourceEntry, SourcesConfig};
use courier_protocol::AgentStatus;
use courier_sinks::{Sink, SinkSkeleton};
use courier_sources::{Source, SourceSkeleton};

use crate::agent::Agent;
use crate::error::AgentError;

/// The shape of a Configure payload (and of the startup file config).
#[derive(Debug, Default, Deserialize)]
pub struct ConfigurePayload {
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub sinks: SinksConfig,
}

/// Apply a Configure payload.
///
/// Status goes `Configuring` for the duration, then `Running` on success or
/// `OnError` on failure; either way a status report goes out.
pub async fn apply(agent: &Arc<Agent>, payload: serde_json::Value) -> Result<(), AgentError> {
    let _gate = agent.configure_gate.lock().await;
    agent.set_status(AgentStatus::Configuring);

    let result = apply_inner(agent, payload).await;

    match &result {
        Ok(()) => agent.set_status(AgentStatus::Running),
        Err(e) => {
            tracing::error!(error = %e, "configuration apply failed");
            agent.set_status(AgentStatus::OnError);
        }
    }

    if let Err(e) = agent.send_status().await {
        tracing::debug!(error = %e, "unable to report status after configure");
    }

    result
}

async fn apply_inner(agent: &Arc<Agent>, payload: serde_json::Value) -> Result<(), AgentError> {
    let parsed: ConfigurePayload =
        serde_json::from_value(payload).map_err(AgentError::InvalidConfigure)?;
    let new_sources = parsed.sources.into_entries();
    let new_sinks = parsed.sinks.into_entries();

    let old_sources = agent.applied_sources.read().clone();
    let old_sinks = agent.applied_sinks.read().clone();

    // build every added or changed instance first; an error here aborts
    // with the old set still running
    let mut built_sinks: HashMap<String, Arc<dyn Sink>> = HashMap::new();
    for (name, entry) in &new_sinks {
        if old_sinks.get(name) != Some(entry) {
            built_sinks.insert(name.clone(), build_sink(agent, name, entry)?);
        }
    }

    let mut built_sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
    for (name, entry) in &new_sources {
        if old_sources.get(name) != Some(entry) {
            built_sources.insert(name.clone(), build_source(agent, name, entry)?);
        }
    }

    tracing::info!(
        sources = new_sources.len(),
        sinks = new_sinks.len(),
        replaced_sources = built_sources.len(),
        replaced_sinks = built_sinks.len(),
        "applying configuration"
    );

    // stop what is going away: sources first (stop producing), then sinks
    // (they flush what is left)
    let stopping_sources: Vec<Arc<dyn Source>> = agent
        .sources
        .read()
        .iter()
        .filter(|(name, _)| !new_sources.contains_key(*name) || built_sources.contains_key(*name))
        .map(|(_, source)| Arc::clone(source))
        .collect();
    for source in stopping_sources {
        if let Err(e) = source.stop().await {
            tracing::warn!(source = %source.name(), error = %e, "stop failed while reconfiguring");
        }
    }

    let stopping_sinks: Vec<Arc<dyn Sink>> = agent
        .sinks
        .read()
        .iter()
        .filter(|(name, _)| !new_sinks.contains_key(*name) || built_sinks.contains_key(*name))
        .map(|(_, sink)| Arc::clone(sink))
        .collect();
    for sink in stopping_sinks {
        if let Err(e) = sink.stop().await {
            tracing::warn!(sink = %sink.name(), error = %e, "stop failed while reconfiguring");
        }
    }

    // the swap: readers see the old full set or the new one
    {
        let mut map = agent.sinks.write();
        map.retain(|name, _| new_sinks.contains_key(name));
        for (name, sink) in &built_sinks {
            map.insert(name.clone(), Arc::clone(sink));
        }
    }
    {
        let mut map = agent.sources.write();
        map.retain(|name, _| new_sources.contains_key(name));
        for (name, source) in &built_sources {
            map.insert(name.clone(), Arc::clone(source));
        }
    }
    *agent.applied_sinks.write() = new_sinks.clone();
    *agent.applied_sources.write() = new_sources.clone();

    // bring the new instances up; sinks first so events have somewhere to go
    for (name, sink) in &built_sinks {
        let entry = &new_sinks[name];
        if entry.enabled {
            if let Err(e) = sink.start().await {
                tracing::error!(sink = %name, error = %e, "sink start failed");
            }
        }
    }

    for (name, source) in &built_sources {
        let entry = &new_sources[name];
        if let Err(e) = source.init().await {
            tracing::error!(source = %name, error = %e, "source init failed");
            continue;
        }
        if entry.enabled && entry.autostart {
            if let Err(e) = source.start().await {
                tracing::error!(source = %name, error = %e, "source autostart failed");
            }
        }
    }

    Ok(())
}

fn build_source(
    agent: &Arc<Agent>,
    name: &str,
    entry: &SourceEntry,
) -> Result<Arc<dyn Source>, AgentError> {
    let skeleton = SourceSkeleton {
        name: name.to_string(),
        agent: agent.header().clone(),
        enabled: entry.enabled,
        autostart: entry.autostart,
        options: entry.options_value(),
        events: agent.events_sender(),
    };
    Ok(courier_sources::build(&entry.source_type, skeleton)?)
}

fn build_sink(
    agent: &Arc<Agent>,
    name: &str,
    entry: &SinkEntry,
) -> Result<Arc<dyn Sink>, AgentError> {
    let skeleton = SinkSkeleton {
        name: name.to_string(),
        agent: agent.header().clone(),
        enabled: entry.enabled,
        options: entry.options_value(),
        faults: agent.faults_tx.clone(),
    };
    Ok(courier_sinks::build(
        &entry.sink_type,
        skeleton,
        Arc::clone(&agent.connector),
    )?)
}
