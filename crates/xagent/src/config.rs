//! Configuration management for xagent
//!
//! The agent is started with a JSON file per controller application. Time
//! values in the file are expressed in seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use xagent_proto::Identity;

use crate::host;

/// Environment switch that relaxes the report interval floor
pub const TEST_MODE_ENV: &str = "XAGENT_TEST";

/// Shortest report interval accepted outside test mode
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_HEARTBEAT_INTERVAL_SECS: f64 = 60.0;
const DEFAULT_RECONNECT_DELAY_BASE_SECS: f64 = 3.0;
const DEFAULT_RECONNECT_DELAY_MAX_SECS: f64 = 10.0;
const DEFAULT_REGISTER_RETRY_DELAY_SECS: f64 = 5.0;
const DEFAULT_REPORT_INTERVAL_SECS: f64 = 60.0;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// How the agent id is derived from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentIdMode {
    /// `<hostname>`
    #[default]
    Hostname,
    /// `<ip>_<hostname>`
    Ip,
}

/// Agent configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Controller WebSocket endpoint
    #[serde(default)]
    pub server: String,

    /// Application credentials
    #[serde(default, rename = "appid")]
    pub app_id: String,
    #[serde(default)]
    pub secret: String,

    /// Directory exposed to helpers and cleaned by the log monitor
    #[serde(default)]
    pub logdir: Option<PathBuf>,

    /// `"IP"` selects `<ip>_<hostname>`, anything else the bare hostname
    #[serde(default)]
    pub agent_id_mode: Option<String>,

    /// Liveness settings, in seconds
    #[serde(default)]
    pub heartbeat_interval: Option<f64>,
    #[serde(default)]
    pub reconnect_delay_base: Option<f64>,
    #[serde(default, rename = "reconnectDelay")]
    pub reconnect_delay_max: Option<f64>,
    #[serde(default)]
    pub register_retry_delay: Option<f64>,

    /// Default monitor cadence, in seconds
    #[serde(default)]
    pub report_interval: Option<f64>,

    /// Manifest files forwarded to the package monitor
    #[serde(default)]
    pub packages: Vec<PathBuf>,

    /// `error|warn|info|debug|trace` or a numeric level 0-3
    #[serde(default, rename = "log_level")]
    pub log_level: Option<Value>,

    /// Embedded in a host process: `shutdown` stops the session but the
    /// process keeps running
    #[serde(default)]
    pub lib_mode: bool,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("server", &self.server)
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .field("logdir", &self.logdir)
            .field("agent_id_mode", &self.agent_id_mode)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect_delay_base", &self.reconnect_delay_base)
            .field("reconnect_delay_max", &self.reconnect_delay_max)
            .field("register_retry_delay", &self.register_retry_delay)
            .field("report_interval", &self.report_interval)
            .field("packages", &self.packages)
            .field("log_level", &self.log_level)
            .field("lib_mode", &self.lib_mode)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            app_id: String::new(),
            secret: String::new(),
            logdir: None,
            agent_id_mode: None,
            heartbeat_interval: None,
            reconnect_delay_base: None,
            reconnect_delay_max: None,
            register_retry_delay: None,
            report_interval: None,
            packages: Vec::new(),
            log_level: None,
            lib_mode: false,
        }
    }
}

impl AgentConfig {
    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, honouring `XAGENT_TEST=YES`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let test_mode = env::var(TEST_MODE_ENV).map_or(false, |v| v == "YES");
        self.validate_with(test_mode)
    }

    /// Validate configuration with an explicit test-mode switch
    pub fn validate_with(&self, test_mode: bool) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.server.is_empty() {
            missing.push("server");
        }
        if self.app_id.is_empty() {
            missing.push("appid");
        }
        if self.secret.is_empty() {
            missing.push("secret");
        }
        if self.logdir.as_ref().map_or(true, |dir| dir.as_os_str().is_empty()) {
            missing.push("logdir");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")));
        }

        for (name, value) in [
            ("heartbeatInterval", self.heartbeat_interval),
            ("reconnectDelayBase", self.reconnect_delay_base),
            ("reconnectDelay", self.reconnect_delay_max),
            ("registerRetryDelay", self.register_retry_delay),
            ("reportInterval", self.report_interval),
        ] {
            if let Some(secs) = value {
                if positive_duration(secs).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{name} must be a positive, representable number of seconds"
                    )));
                }
            }
        }

        if self.reconnect_delay_base() > self.reconnect_delay_max() {
            return Err(ConfigError::Invalid(
                "reconnectDelayBase cannot exceed reconnectDelay".to_string(),
            ));
        }

        if !test_mode && self.report_interval() < MIN_REPORT_INTERVAL {
            return Err(ConfigError::Invalid(
                "report interval should not be less than 60s".to_string(),
            ));
        }

        Ok(())
    }

    pub fn agent_id_mode(&self) -> AgentIdMode {
        match self.agent_id_mode.as_deref() {
            Some("IP") => AgentIdMode::Ip,
            _ => AgentIdMode::Hostname,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL_SECS)
    }

    pub fn reconnect_delay_base(&self) -> Duration {
        secs(self.reconnect_delay_base, DEFAULT_RECONNECT_DELAY_BASE_SECS)
    }

    pub fn reconnect_delay_max(&self) -> Duration {
        secs(self.reconnect_delay_max, DEFAULT_RECONNECT_DELAY_MAX_SECS)
    }

    pub fn register_retry_delay(&self) -> Duration {
        secs(self.register_retry_delay, DEFAULT_REGISTER_RETRY_DELAY_SECS)
    }

    pub fn report_interval(&self) -> Duration {
        secs(self.report_interval, DEFAULT_REPORT_INTERVAL_SECS)
    }

    /// Build the session identity, resolving the agent id from the host
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let agent_id = host::agent_id(self.agent_id_mode())
            .map_err(|e| ConfigError::Invalid(format!("cannot resolve agent id: {e}")))?;
        Ok(Identity::new(
            self.app_id.clone(),
            self.secret.clone(),
            agent_id,
        ))
    }
}

/// Non-zero duration for `secs`, or `None` when it rounds to zero or overflows
fn positive_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|duration| !duration.is_zero())
}

fn secs(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(positive_duration)
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}
