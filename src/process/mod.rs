//! Process supervision
//!
//! This module owns every external process deimos starts:
//! - [`ProcessSupervisor`] spawns, tracks and force-terminates children
//! - [`ProcessHandle`] exposes one child's lifecycle and its event stream
//! - [`EventStream`] delivers classified output in production order

pub mod handle;
pub mod supervisor;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use handle::{EventStream, ProcessHandle};
pub use supervisor::{ProcessSupervisor, SpawnRequest};

/// Supervisor-local child identifier
pub type ChildId = u64;

pub const SIGINT: i32 = libc::SIGINT;
pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessExit {
    /// Normal exit with a status code
    Exited(i32),
    /// Terminated by a signal
    Killed(i32),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Exited(code) => Some(*code),
            ProcessExit::Killed(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ProcessExit::Killed(signal) => Some(*signal),
            ProcessExit::Exited(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Killed(signal);
            }
        }
        ProcessExit::Exited(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(code) => write!(f, "exited with code {}", code),
            ProcessExit::Killed(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

/// Lifecycle of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited(i32),
    Killed(i32),
    FailedToStart(String),
}

impl ProcessState {
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ProcessState::Starting | ProcessState::Running)
    }

    /// Exit information once the process has actually run and ended
    pub fn exit(&self) -> Option<ProcessExit> {
        match self {
            ProcessState::Exited(code) => Some(ProcessExit::Exited(*code)),
            ProcessState::Killed(signal) => Some(ProcessExit::Killed(*signal)),
            _ => None,
        }
    }
}

impl From<ProcessExit> for ProcessState {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Exited(code) => ProcessState::Exited(code),
            ProcessExit::Killed(signal) => ProcessState::Killed(signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_exit_mapping() {
        assert_eq!(ProcessState::Exited(3).exit(), Some(ProcessExit::Exited(3)));
        assert_eq!(
            ProcessState::from(ProcessExit::Killed(SIGKILL)),
            ProcessState::Killed(SIGKILL)
        );
        assert!(ProcessState::FailedToStart("ENOENT".into()).is_terminated());
        assert!(!ProcessState::Running.is_terminated());
        assert_eq!(ProcessState::FailedToStart("ENOENT".into()).exit(), None);
    }

    #[test]
    fn test_exit_accessors() {
        assert!(ProcessExit::Exited(0).success());
        assert_eq!(ProcessExit::Killed(SIGTERM).signal(), Some(SIGTERM));
        assert_eq!(ProcessExit::Killed(SIGTERM).code(), None);
    }
}
