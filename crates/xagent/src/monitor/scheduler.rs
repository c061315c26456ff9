//! Monitor scheduler
//!
//! Each monitor gets one task that owns its ticker and the runs it spawned.
//! Runs may overlap when a monitor is slower than its cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::{Monitor, MonitorReport, Reporter};
use crate::config::AgentConfig;

/// Runs registered monitors on independent intervals
#[derive(Default)]
pub struct MonitorScheduler {
    pending: Vec<Box<dyn Monitor>>,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl MonitorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a monitor; ignored once the scheduler has started
    pub fn register(&mut self, monitor: Box<dyn Monitor>) {
        if self.started {
            warn!("Monitor {} registered after start, ignoring", monitor.name());
            return;
        }
        self.pending.push(monitor);
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of monitors currently scheduled
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Initialise and schedule every registered monitor. Only the first call
    /// has any effect.
    pub fn start(&mut self, config: &AgentConfig, reports: mpsc::UnboundedSender<MonitorReport>) {
        if self.started {
            return;
        }
        self.started = true;

        let default_interval = config.report_interval();
        info!("Starting {} monitors", self.pending.len());

        for mut monitor in self.pending.drain(..) {
            if let Err(e) = monitor.init(config) {
                error!("Monitor {} failed to initialise: {}", monitor.name(), e);
                continue;
            }
            let period = monitor.report_interval().unwrap_or(default_interval);
            info!(
                "- {}, immediate: {}, every {:?}",
                monitor.name(),
                monitor.immediate(),
                period
            );
            let reporter = Reporter::new(monitor.name(), reports.clone());
            let monitor: Arc<dyn Monitor> = Arc::from(monitor);
            self.tasks.push(tokio::spawn(schedule(monitor, period, reporter)));
        }
    }

    /// Cancel every monitor timer and in-flight run
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn schedule(monitor: Arc<dyn Monitor>, period: Duration, reporter: Reporter) {
    let mut runs = JoinSet::new();
    if monitor.immediate() {
        runs.spawn(run_once(monitor.clone(), reporter.clone()));
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                runs.spawn(run_once(monitor.clone(), reporter.clone()));
            }
            Some(joined) = runs.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Monitor {} panicked", monitor.name());
                    }
                }
            }
        }
    }
}

async fn run_once(monitor: Arc<dyn Monitor>, reporter: Reporter) {
    let outcome = monitor.run().await;
    reporter.report(outcome);
}
