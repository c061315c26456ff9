//! Bundled helper registry
//!
//! The controller names a helper; it never supplies a path.

use std::fmt;

/// Helpers shipped next to the agent executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperCommand {
    CheckFile,
    CheckProcesses,
    GetOsInfo,
}

impl HelperCommand {
    pub const ALL: [HelperCommand; 3] = [
        HelperCommand::CheckFile,
        HelperCommand::CheckProcesses,
        HelperCommand::GetOsInfo,
    ];

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|helper| helper.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HelperCommand::CheckFile => "check_file",
            HelperCommand::CheckProcesses => "check_processes",
            HelperCommand::GetOsInfo => "get_os_info",
        }
    }

    /// File name inside the helper directory
    pub fn executable(&self) -> String {
        format!("{}{}", self.name(), std::env::consts::EXE_SUFFIX)
    }
}

impl fmt::Display for HelperCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
