//! xagent entry point
//!
//! Loads the config file given on the command line and runs one agent
//! session until the controller sends `shutdown`. The process then exits 0
//! unless `libMode` is set.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use xagent::connection::WsConnector;
use xagent::{monitor, telemetry, AgentConfig, AgentSession, CommandExecutor, SessionExit};

#[derive(Parser, Debug)]
#[command(name = "xagent", version, about = "Host agent for the xagent controller")]
struct Cli {
    /// Path to the JSON config file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AgentConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            telemetry::init(None);
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    telemetry::init(config.log_level.as_ref());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let identity = config.identity()?;
    let executor = CommandExecutor::bundled().context("cannot locate bundled helpers")?;
    info!(
        "Starting xagent {} as {} (helpers in {})",
        xagent::AGENT_VERSION,
        identity.agent_id,
        executor.helper_dir().display()
    );

    let lib_mode = config.lib_mode;
    let connector = Arc::new(WsConnector::new(config.server.clone()));
    let mut session = AgentSession::new(config, identity, connector, executor);
    for monitor in monitor::builtin() {
        session.register_monitor(monitor);
    }

    tokio::select! {
        exit = session.run() => match exit? {
            SessionExit::Shutdown => info!("xagent shut down by controller"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Interrupted, exiting");
            return Ok(());
        }
    }

    if lib_mode {
        // The host process owns the lifetime; stay idle until it stops us
        info!("libMode set, keeping the process alive after shutdown");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
    }
    Ok(())
}
