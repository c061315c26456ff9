//! Helper process management
//!
//! Helpers run in their own process group so a timeout can take down
//! anything they spawned. Output is buffered in full and returned once the
//! helper exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{bundled_helper_dir, CommandError, CommandInvocation, HelperCommand};

/// Captured helper output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Runs registry helpers from a fixed directory
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    helper_dir: PathBuf,
}

impl CommandExecutor {
    /// Executor for the helpers installed beside the running executable
    pub fn bundled() -> std::io::Result<Self> {
        Ok(Self::with_helper_dir(bundled_helper_dir()?))
    }

    pub fn with_helper_dir(helper_dir: impl Into<PathBuf>) -> Self {
        Self {
            helper_dir: helper_dir.into(),
        }
    }

    pub fn helper_dir(&self) -> &Path {
        &self.helper_dir
    }

    /// Map a registry name to its executable; unknown names never reach the filesystem
    pub fn resolve(&self, name: &str) -> Result<PathBuf, CommandError> {
        let helper =
            HelperCommand::lookup(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        Ok(self.helper_dir.join(helper.executable()))
    }

    pub async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandError> {
        self.execute(
            &invocation.name,
            &invocation.args,
            &invocation.env,
            invocation.timeout,
        )
        .await
    }

    /// Run `name` with `args` and exactly `env` as its environment
    pub async fn execute(
        &self,
        name: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let program = self.resolve(name)?;
        debug!("Executing {} {:?} (timeout {:?})", program.display(), args, timeout);

        let mut command = Command::new(&program);
        command
            .args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            name: name.to_string(),
            source,
        })?;
        let pid = child.id();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Drain both pipes while waiting so a chatty helper cannot block on a full pipe
        let finished = tokio::time::timeout(timeout, async {
            tokio::join!(child.wait(), drain(&mut stdout), drain(&mut stderr))
        })
        .await;

        match finished {
            Ok((status, out, err)) => {
                let status = status?;
                let output = CommandOutput {
                    stdout: String::from_utf8_lossy(&out?).into_owned(),
                    stderr: String::from_utf8_lossy(&err?).into_owned(),
                    exit_code: status.code(),
                };
                if !status.success() {
                    info!("Command {} exited with {}", name, status);
                }
                Ok(output)
            }
            Err(_) => {
                warn!("Command {} timed out after {:?}, killing it", name, timeout);
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                let _ = child.kill().await;
                Err(CommandError::Timeout {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: &mut Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // The group id equals the leader's pid with process_group(0)
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", raw, e);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_stays_in_helper_dir() {
        let executor = CommandExecutor::with_helper_dir("/opt/xagent/bin");
        let path = executor.resolve("check_file").unwrap();
        assert_eq!(path.parent(), Some(Path::new("/opt/xagent/bin")));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("check_file"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_not_spawned() {
        let executor = CommandExecutor::with_helper_dir("/opt/xagent/bin");
        let result = executor
            .execute("sh", &["-c".to_string()], &HashMap::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CommandError::Unknown(name)) if name == "sh"));
    }

    #[tokio::test]
    async fn test_missing_helper_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::with_helper_dir(dir.path());
        let result = executor
            .execute("get_os_info", &[], &HashMap::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_helper() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(HelperCommand::CheckProcesses.executable());
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = CommandExecutor::with_helper_dir(dir.path());
        let env: HashMap<String, String> = std::env::vars().collect();
        let started = std::time::Instant::now();
        let result = executor
            .execute("check_processes", &[], &env, Duration::from_millis(200))
            .await;

        assert!(matches!(result, Err(CommandError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_still_returns_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(HelperCommand::GetOsInfo.executable());
        std::fs::write(&script, "#!/bin/sh\necho out\necho \"$agentid\" >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = CommandExecutor::with_helper_dir(dir.path());
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert("agentid".to_string(), "host-a".to_string());
        let output = executor
            .execute("get_os_info", &[], &env, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "host-a\n");
        assert_eq!(output.exit_code, Some(3));
    }
}
