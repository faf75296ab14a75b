//! Run command - the agent daemon
//!
//! Loads configuration, bootstraps identity (hostname from the OS, uuid
//! generated and persisted on first start), opens the controller link,
//! applies any file-local source/sink configuration and then serves the
//! controller until a shutdown signal or an unrecoverable link failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_agent::{registration_envelope, Agent};
use courier_config::{persist_uuid, Config};
use courier_link::LinkConfig;
use courier_sinks::transport::NullConnector;

/// How long the orderly shutdown may take before workers are abandoned.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Config file names probed inside `--config-path` (or the working
/// directory) when `--config` is not given.
const DEFAULT_CONFIG_NAMES: &[&str] = &["courier.toml", "config.toml"];

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the configuration file (error if specified but not found)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to search for courier.toml / config.toml
    #[arg(long)]
    pub config_path: Option<PathBuf>,
}

/// Locate the configuration file for the given arguments.
pub fn resolve_config_path(args: &RunArgs) -> Result<PathBuf, String> {
    if let Some(path) = &args.config {
        if !path.exists() {
            return Err(format!("config file not found: {}", path.display()));
        }
        return Ok(path.clone());
    }

    let dir = args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    for name in DEFAULT_CONFIG_NAMES {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(format!(
        "no configuration file found in {} (looked for {})",
        dir.display(),
        DEFAULT_CONFIG_NAMES.join(", ")
    ))
}

/// Run the agent daemon.
pub async fn run(args: RunArgs) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "Courier starting"
    );

    // configuration and identity; everything here is exit code 1
    let config_path = match resolve_config_path(&args) {
        Ok(path) => path,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    let mut config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %config_path.display(), error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = config.agent.ensure_hostname() {
        error!(error = %e, "configuration error");
        return ExitCode::from(1);
    }

    if config.agent.ensure_uuid() {
        // keep the generated identity stable across restarts
        if let Err(e) = persist_uuid(&config_path, &config.agent.uuid) {
            warn!(
                config = %config_path.display(),
                error = %e,
                "unable to persist generated uuid; it will change on restart"
            );
        }
    }

    info!(
        config = %config_path.display(),
        tenant = %config.agent.tenant,
        env = %config.agent.env,
        uuid = %config.agent.uuid,
        controller = %format!("{}:{}", config.agent.controller.host, config.agent.controller.port),
        "configuration loaded"
    );

    // the controller link; registration doubles as the config request
    let cancel = CancellationToken::new();
    let header = config.agent.header();
    let secret_key = config.agent.secretkey.clone();

    let register = match registration_envelope(&header, &secret_key) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "unable to build registration frame");
            return ExitCode::from(1);
        }
    };

    let link_config = LinkConfig::new(
        config.agent.controller.host.clone(),
        config.agent.controller.port,
    );
    let (link, inbound, mut link_task) = courier_link::spawn(link_config, register, cancel.clone());

    // no concrete broker client is linked into this build; the connector
    // seam is where one plugs in
    let connector = Arc::new(NullConnector);
    let (agent, channels) = Agent::new(header, secret_key, link, connector, cancel.clone());
    let runtime_tasks = agent.spawn_runtime(channels, inbound);

    // file-local sources/sinks come up before the controller says anything
    if !config.sources.is_empty() || !config.sinks.is_empty() {
        let payload = serde_json::json!({
            "sources": config.sources,
            "sinks": config.sinks,
        });
        if let Err(e) = agent.apply_configuration(payload).await {
            error!(error = %e, "startup configuration failed");
            shutdown(&agent, runtime_tasks).await;
            return ExitCode::from(3);
        }
    }

    info!(
        sources = agent.source_names().len(),
        sinks = agent.sink_names().len(),
        "Courier agent running"
    );

    // serve until a signal arrives or the link gives up for good
    let exit = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, stopping agent...");
            ExitCode::SUCCESS
        }
        result = &mut link_task => {
            match result {
                Ok(Ok(())) => {
                    info!("controller link closed");
                    ExitCode::SUCCESS
                }
                Ok(Err(e)) => {
                    error!(error = %e, "unrecoverable link failure");
                    ExitCode::from(2)
                }
                Err(e) => {
                    error!(error = %e, "link task panicked");
                    ExitCode::from(2)
                }
            }
        }
    };

    shutdown(&agent, runtime_tasks).await;
    info!("Courier shutdown complete");
    exit
}

/// Orderly shutdown under the deadline; stragglers are abandoned.
async fn shutdown(agent: &Arc<Agent>, tasks: Vec<JoinHandle<()>>) {
    let sequence = async {
        agent.shutdown().await;
        for task in tasks {
            let _ = task.await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_DEADLINE, sequence).await.is_err() {
        warn!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown deadline exceeded, abandoning remaining workers"
        );
    }
}
