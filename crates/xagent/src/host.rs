//! Host facts: agent identity, process liveness and OS description

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use serde::Serialize;
use sysinfo::System;
use tracing::debug;

use crate::config::AgentIdMode;

/// Derive the agent id for this host
pub fn agent_id(mode: AgentIdMode) -> io::Result<String> {
    let hostname = hostname::get()?.to_string_lossy().into_owned();
    Ok(match mode {
        AgentIdMode::Hostname => hostname,
        AgentIdMode::Ip => format!("{}_{}", local_ip(), hostname),
    })
}

/// Address of the interface that routes outward; loopback when offline.
///
/// Connecting a UDP socket only selects a route, no packet is sent.
pub fn local_ip() -> IpAddr {
    let route = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    route().unwrap_or_else(|e| {
        debug!("Cannot resolve local address, using loopback: {}", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}

/// Whether a process with this pid currently exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        // Exists but belongs to another user
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Output of the `get_os_info` helper
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    pub agent_version: String,
    /// `type/hostname/platform/arch/release`
    pub os_info: String,
    /// Core dump size limit as `ulimit -c` prints it
    pub ulimit_c: String,
}

/// Describe the running host
pub fn os_info() -> OsInfo {
    let os_type = System::name().unwrap_or_else(|| "unknown".to_string());
    let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
    let release = System::kernel_version().unwrap_or_else(|| "unknown".to_string());

    OsInfo {
        agent_version: crate::AGENT_VERSION.to_string(),
        os_info: format!(
            "{}/{}/{}/{}/{}",
            os_type,
            hostname,
            std::env::consts::OS,
            std::env::consts::ARCH,
            release
        ),
        ulimit_c: core_limit(),
    }
}

#[cfg(unix)]
fn core_limit() -> String {
    use nix::sys::resource::{getrlimit, Resource, RLIM_INFINITY};

    match getrlimit(Resource::RLIMIT_CORE) {
        Ok((soft, _)) if soft == RLIM_INFINITY => "unlimited".to_string(),
        // ulimit -c counts 1024-byte blocks
        Ok((soft, _)) => (soft / 1024).to_string(),
        Err(e) => {
            debug!("getrlimit(RLIMIT_CORE) failed: {}", e);
            "unknown".to_string()
        }
    }
}

#[cfg(not(unix))]
fn core_limit() -> String {
    "unlimited".to_string()
}
