//! Command execution module
//!
//! Turns controller `command` params into an invocation of a bundled helper
//! and runs it with a timeout.

pub mod process;
pub mod registry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use process::{CommandExecutor, CommandOutput};
pub use registry::HelperCommand;

/// Timeout applied when the controller does not send one
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3000);

/// Command error types
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid command params: {0}")]
    InvalidParams(String),

    #[error("Command is empty")]
    Empty,

    #[error("Command not allowed: {0}")]
    Unknown(String),

    #[error("Failed to start {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("Command {name} timed out after {}ms", .timeout.as_millis())]
    Timeout { name: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed `command` request
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub name: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub env: HashMap<String, String>,
    pub trace_id: String,
}

impl CommandInvocation {
    /// Parse `command{command, timeout?, env?}`.
    ///
    /// The child environment is layered `logdir`/`agentid`, then this
    /// process's environment, then the message's `env`; later layers win.
    pub fn from_params(
        params: &Value,
        trace_id: impl Into<String>,
        logdir: Option<&Path>,
        agent_id: &str,
    ) -> Result<Self, CommandError> {
        let params = params
            .as_object()
            .ok_or_else(|| CommandError::InvalidParams("params must be an object".to_string()))?;

        let command = match params.get("command") {
            Some(Value::String(command)) => command,
            Some(_) => {
                return Err(CommandError::InvalidParams(
                    "'command' must be a string".to_string(),
                ))
            }
            None => return Err(CommandError::Empty),
        };

        let mut parts = command.split_whitespace().map(str::to_string);
        let name = parts.next().ok_or(CommandError::Empty)?;
        let args = parts.collect();

        // Anything but a representable positive number of ms uses the default
        let timeout = params
            .get("timeout")
            .and_then(Value::as_f64)
            .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);

        let mut env = HashMap::new();
        if let Some(logdir) = logdir {
            env.insert("logdir".to_string(), logdir.display().to_string());
        }
        env.insert("agentid".to_string(), agent_id.to_string());
        env.extend(std::env::vars());
        if let Some(Value::Object(overrides)) = params.get("env") {
            for (key, value) in overrides {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                env.insert(key.clone(), value);
            }
        }

        Ok(Self {
            name,
            args,
            timeout,
            env,
            trace_id: trace_id.into(),
        })
    }

    /// Registry entry for this invocation's name
    pub fn helper(&self) -> Result<HelperCommand, CommandError> {
        HelperCommand::lookup(&self.name).ok_or_else(|| CommandError::Unknown(self.name.clone()))
    }
}

/// Directory holding the running executable
pub fn bundled_helper_dir() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "executable has no parent directory",
        )
    })
}
