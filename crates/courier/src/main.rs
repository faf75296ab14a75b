//! Courier - change-data-capture and event-shipping agent
//!
//! # Usage
//!
//! ```bash
//! # Run the agent
//! courier run --config /etc/courier/courier.toml
//!
//! # Or point it at a directory holding courier.toml / config.toml
//! courier run --config-path /etc/courier
//! ```
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! link failure, 3 fatal source/sink error at startup.

mod cmd;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use courier_config::{Config, LogFormat};

/// Change-data-capture and event-shipping agent
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent (daemon mode)
    Run(cmd::run::RunArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let (level, format) = resolve_logging(cli.log_level.as_deref(), &args);
            if let Err(e) = init_logging(&level, format) {
                eprintln!("unable to initialize logging: {e}");
                return ExitCode::from(1);
            }
            cmd::run::run(args).await
        }
    }
}

/// Resolve log settings: CLI flag > config file > default "info".
fn resolve_logging(cli_level: Option<&str>, args: &cmd::run::RunArgs) -> (String, LogFormat) {
    let config = cmd::run::resolve_config_path(args)
        .ok()
        .and_then(|path| Config::from_file(path).ok());

    let format = config
        .as_ref()
        .map(|c| c.log.format)
        .unwrap_or(LogFormat::Console);

    if let Some(level) = cli_level {
        return (level.to_string(), format);
    }

    let level = config
        .map(|c| c.log.level.as_str().to_string())
        .unwrap_or_else(|| "info".to_string());
    (level, format)
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true))
                .with(filter)
                .init();
        }
        LogFormat::Console => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_thread_ids(false))
                .with(filter)
                .init();
        }
    }

    Ok(())
}
