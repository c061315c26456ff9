//! xagent - unattended host agent
//!
//! This crate implements the agent runtime that keeps a signed session with
//! the controller over a WebSocket, runs controller-issued commands as bundled
//! helper subprocesses, and periodically reports locally collected telemetry.
//!
//! Key features:
//! - Registration with retry until the controller acknowledges
//! - Heartbeat liveness with a three-miss tolerance window
//! - Randomized reconnect delay to spread fleet reconnect storms
//! - Fixed command registry, never a path from the network
//! - Pluggable periodic monitors that survive reconnects

pub mod config;
pub mod connection;
pub mod executor;
pub mod host;
pub mod monitor;
pub mod session;
pub mod telemetry;

pub use config::{AgentConfig, ConfigError};
pub use connection::{Connector, Transport, TransportError, TransportEvent, TransportEvents};
pub use executor::{CommandError, CommandExecutor, CommandInvocation, CommandOutput, HelperCommand};
pub use monitor::{Monitor, MonitorError, MonitorScheduler, Reporter};
pub use session::{AgentSession, AgentState, SessionExit, SessionSnapshot, TimerKind};

/// Agent version reported in `register`
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent result type
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] xagent_proto::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] connection::TransportError),

    #[error("Command error: {0}")]
    Command(#[from] executor::CommandError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] monitor::MonitorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}
