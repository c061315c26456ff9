//! Removes stale log and socket files from `logdir`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::Value;
use tracing::{info, warn};

use super::{Monitor, MonitorError};
use crate::config::AgentConfig;
use crate::host;

/// Dated logs younger than this are kept
pub const KEEP_DAYS: i64 = 7;

const LOG_PREFIXES: [&str; 4] = ["xnode", "xprofiler", "xprofiler-error", "xprofiler-debug"];
const SOCKET_PREFIXES: [&str; 2] = ["xnode-uds-path", "xprofiler-uds-path"];

#[derive(Debug, Default)]
pub struct CleanLogMonitor {
    logdir: Option<PathBuf>,
}

impl CleanLogMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `<prefix>-YYYYMMDD.log` at least [`KEEP_DAYS`] old
fn is_stale_log(name: &str, today: NaiveDate) -> bool {
    let Some(stem) = name.strip_suffix(".log") else {
        return false;
    };
    let Some((prefix, date)) = stem.rsplit_once('-') else {
        return false;
    };
    if !LOG_PREFIXES.contains(&prefix) || date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match NaiveDate::parse_from_str(date, "%Y%m%d") {
        Ok(date) => (today - date).num_days() >= KEEP_DAYS,
        Err(_) => false,
    }
}

/// `<prefix>-<pid>.sock` whose owner is gone
fn is_orphan_socket(name: &str, is_alive: impl Fn(u32) -> bool) -> bool {
    let Some(stem) = name.strip_suffix(".sock") else {
        return false;
    };
    let Some((prefix, pid)) = stem.rsplit_once('-') else {
        return false;
    };
    if !SOCKET_PREFIXES.contains(&prefix) || pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match pid.parse::<u32>() {
        Ok(pid) => !is_alive(pid),
        Err(_) => true,
    }
}

/// File names in `names` that should be deleted
pub fn files_to_clean<'a>(
    names: impl IntoIterator<Item = &'a str>,
    today: NaiveDate,
    is_alive: impl Fn(u32) -> bool,
) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| is_stale_log(name, today) || is_orphan_socket(name, &is_alive))
        .map(str::to_string)
        .collect()
}

async fn clean(logdir: &Path) -> Result<usize, MonitorError> {
    let io_err = |source| MonitorError::Io {
        path: logdir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(logdir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }

    let today = Local::now().date_naive();
    let doomed = files_to_clean(names.iter().map(String::as_str), today, host::is_alive);

    let mut first_error = None;
    for name in &doomed {
        let path = logdir.join(name);
        info!("Cleaning old log or socket file: {}", path.display());
        if let Err(source) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove {}: {}", path.display(), source);
            first_error.get_or_insert(MonitorError::Io { path, source });
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(doomed.len()),
    }
}

#[async_trait]
impl Monitor for CleanLogMonitor {
    fn name(&self) -> &str {
        "clean_log"
    }

    fn immediate(&self) -> bool {
        true
    }

    fn report_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(24 * 60 * 60))
    }

    fn init(&mut self, config: &AgentConfig) -> Result<(), MonitorError> {
        self.logdir = config.logdir.clone();
        Ok(())
    }

    async fn run(&self) -> Result<Option<Value>, MonitorError> {
        let logdir = self
            .logdir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| MonitorError::Missing("logdir".to_string()))?;
        clean(logdir).await?;
        Ok(None)
    }
}
