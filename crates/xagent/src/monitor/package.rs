//! Reports the application manifests listed under `packages`

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Monitor, MonitorError};
use crate::config::AgentConfig;

const LOCKFILE_NAME: &str = "package-lock.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageEntry {
    package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_lock: Option<String>,
}

#[derive(Debug, Default)]
pub struct PackageMonitor {
    packages: Vec<PathBuf>,
}

impl PackageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect(&self) -> Result<Vec<PackageEntry>, MonitorError> {
        let mut entries = Vec::new();
        for manifest in &self.packages {
            if !tokio::fs::try_exists(manifest).await.unwrap_or(false) {
                continue;
            }
            let package = read(manifest).await?;

            let lockfile = manifest
                .parent()
                .map(|dir| dir.join(LOCKFILE_NAME))
                .unwrap_or_else(|| PathBuf::from(LOCKFILE_NAME));
            let package_lock = if tokio::fs::try_exists(&lockfile).await.unwrap_or(false) {
                Some(read(&lockfile).await?)
            } else {
                None
            };

            entries.push(PackageEntry {
                package,
                package_lock,
            });
        }
        Ok(entries)
    }
}

async fn read(path: &Path) -> Result<String, MonitorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| MonitorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl Monitor for PackageMonitor {
    fn name(&self) -> &str {
        "package"
    }

    fn immediate(&self) -> bool {
        true
    }

    fn report_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(60 * 60))
    }

    fn init(&mut self, config: &AgentConfig) -> Result<(), MonitorError> {
        self.packages = config.packages.clone();
        Ok(())
    }

    async fn run(&self) -> Result<Option<Value>, MonitorError> {
        let packages = self.collect().await?;
        Ok(Some(json!({
            "type": "xagent_notification",
            "metrics": {
                "ok": true,
                "data": { "packages": packages }
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_manifest_and_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let with_lock = dir.path().join("a");
        let without_lock = dir.path().join("b");
        std::fs::create_dir_all(&with_lock).unwrap();
        std::fs::create_dir_all(&without_lock).unwrap();
        std::fs::write(with_lock.join("package.json"), "{\"name\":\"a\"}").unwrap();
        std::fs::write(with_lock.join(LOCKFILE_NAME), "{\"lockfileVersion\":3}").unwrap();
        std::fs::write(without_lock.join("package.json"), "{\"name\":\"b\"}").unwrap();

        let mut monitor = PackageMonitor::new();
        monitor
            .init(&AgentConfig {
                packages: vec![
                    with_lock.join("package.json"),
                    dir.path().join("missing/package.json"),
                    without_lock.join("package.json"),
                ],
                ..AgentConfig::default()
            })
            .unwrap();

        let report = monitor.run().await.unwrap().unwrap();
        assert_eq!(
            report,
            json!({
                "type": "xagent_notification",
                "metrics": {"ok": true, "data": {"packages": [
                    {"package": "{\"name\":\"a\"}", "packageLock": "{\"lockfileVersion\":3}"},
                    {"package": "{\"name\":\"b\"}"}
                ]}}
            })
        );
    }

    #[tokio::test]
    async fn test_no_packages_still_reports() {
        let monitor = PackageMonitor::new();
        let report = monitor.run().await.unwrap().unwrap();
        assert_eq!(report["metrics"]["data"]["packages"], json!([]));
    }
}
