//! Deimos - process supervision and multi-target attack orchestration
//!
//! Drives external network tools against discovered hosts, turns their
//! output into typed events, and runs an ordered attack pipeline against
//! many targets concurrently.

pub mod attack;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod process;
pub mod tools;

// Re-export commonly used types
pub use attack::{AttackContext, AttackJob, JobReport, JobStatus, JobSummary, MultiAttack, Stage, StageSet};
pub use config::DeimosConfig;
pub use error::{DeimosError, DeimosResult};
pub use events::{Event, Finding, Severity};
pub use network::{Port, Protocol, Target};
pub use process::{ProcessExit, ProcessHandle, ProcessState, ProcessSupervisor, SpawnRequest};
pub use tools::{EventReceiver, Tool, ToolRun, Tools};

pub type Result<T> = std::result::Result<T, DeimosError>;
