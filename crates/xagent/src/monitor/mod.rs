//! Periodic monitors
//!
//! A monitor collects something about the host on its own cadence. Whatever
//! it produces is forwarded to the session as a `log` message; errors are
//! only logged.

pub mod clean_log;
pub mod package;
pub mod scheduler;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::AgentConfig;

pub use clean_log::CleanLogMonitor;
pub use package::PackageMonitor;
pub use scheduler::MonitorScheduler;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

/// A periodic telemetry producer
#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;

    /// Run once as soon as the scheduler starts
    fn immediate(&self) -> bool {
        false
    }

    /// Own cadence; `None` uses the session report interval
    fn report_interval(&self) -> Option<Duration> {
        None
    }

    /// Called once before the first run
    fn init(&mut self, _config: &AgentConfig) -> Result<(), MonitorError> {
        Ok(())
    }

    /// Collect one report; `Ok(None)` means nothing to send
    async fn run(&self) -> Result<Option<Value>, MonitorError>;
}

/// A non-empty report ready to be sent as `log`
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub monitor: String,
    pub params: Value,
}

/// Applies report semantics and hands results to the session
#[derive(Debug, Clone)]
pub struct Reporter {
    monitor: String,
    tx: mpsc::UnboundedSender<MonitorReport>,
}

impl Reporter {
    pub fn new(monitor: impl Into<String>, tx: mpsc::UnboundedSender<MonitorReport>) -> Self {
        Self {
            monitor: monitor.into(),
            tx,
        }
    }

    /// Returns true when a `log` was queued
    pub fn report(&self, outcome: Result<Option<Value>, MonitorError>) -> bool {
        let params = match outcome {
            Err(e) => {
                error!("Monitor {} failed: {}", self.monitor, e);
                return false;
            }
            Ok(None) | Ok(Some(Value::Null)) => return false,
            Ok(Some(Value::Array(items))) if items.is_empty() => return false,
            Ok(Some(params)) => params,
        };

        debug!("Monitor {} produced a report", self.monitor);
        self.tx
            .send(MonitorReport {
                monitor: self.monitor.clone(),
                params,
            })
            .is_ok()
    }
}

/// The monitors shipped with the agent, in start order
pub fn builtin() -> Vec<Box<dyn Monitor>> {
    vec![
        Box::new(CleanLogMonitor::new()),
        Box::new(PackageMonitor::new()),
    ]
}
