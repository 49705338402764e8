//! Multi-target attack pipeline
//!
//! An [`AttackJob`] runs a fixed, ordered sequence of [`Stage`]s against
//! every target at once. Each target is owned by one [`TargetWorker`] for
//! the whole run; stages of one target run strictly one after the other.

pub mod finder;
pub mod orchestrator;
pub mod progress;
pub mod stages;
pub mod worker;

use crate::config::AttackConfig;
use crate::tools::Tools;
use crate::{DeimosError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use finder::{ExploitFinder, FinderReceiver, MsfRpc, SearchHandle, VulnerabilityFinder};
pub use orchestrator::{AttackJob, JobReport, JobStatus, JobSummary, MultiAttack, TargetReport};
pub use progress::{ConsoleProgress, LogProgress, ProgressSink};
pub use stages::{PortMapper, PortRecorder, StageRunner};
pub use worker::{TargetWorker, WorkerState};

/// Pipeline stages, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Trace,
    Scan,
    Inspect,
    Vuln,
    Exploit,
    Crack,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Trace,
        Stage::Scan,
        Stage::Inspect,
        Stage::Vuln,
        Stage::Exploit,
        Stage::Crack,
    ];

    /// Legacy integer flag of this stage
    pub fn flag(&self) -> u32 {
        match self {
            Stage::Trace => 1,
            Stage::Scan => 2,
            Stage::Inspect => 4,
            Stage::Vuln => 8,
            Stage::Exploit => 16,
            Stage::Crack => 32,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trace => "trace",
            Stage::Scan => "scan",
            Stage::Inspect => "inspect",
            Stage::Vuln => "vuln",
            Stage::Exploit => "exploit",
            Stage::Crack => "crack",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DeimosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Stage::Trace),
            "scan" | "port-scanner" => Ok(Stage::Scan),
            "inspect" | "inspector" => Ok(Stage::Inspect),
            "vuln" | "vulnerability-finder" => Ok(Stage::Vuln),
            "exploit" | "exploit-finder" => Ok(Stage::Exploit),
            "crack" | "login-cracker" => Ok(Stage::Crack),
            other => Err(DeimosError::ParseError(format!("unknown stage '{}'", other))),
        }
    }
}

/// Selection of stages. Iteration always follows [`Stage::ALL`] order,
/// whatever order the stages were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet(BTreeSet<Stage>);

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Stage::ALL.into_iter().collect()
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.0.insert(stage);
        self
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0.insert(stage);
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.iter().copied()
    }

    /// Build from the legacy integer bitmask. Unknown bits are rejected.
    pub fn from_flags(flags: u32) -> Result<Self> {
        let known = Stage::ALL.iter().fold(0, |acc, s| acc | s.flag());
        if flags & !known != 0 {
            return Err(DeimosError::ParseError(format!(
                "unknown stage flags {:#x}",
                flags & !known
            )));
        }
        Ok(Stage::ALL
            .into_iter()
            .filter(|s| flags & s.flag() != 0)
            .collect())
    }

    pub fn flags(&self) -> u32 {
        self.iter().fold(0, |acc, s| acc | s.flag())
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Comma separated stage names, e.g. `scan,inspect`
impl FromStr for StageSet {
    type Err = DeimosError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Stage::from_str)
            .collect()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// Everything a stage may call out to
#[derive(Clone)]
pub struct AttackContext {
    pub mapper: Arc<dyn PortMapper>,
    pub vulnerability_finder: Option<Arc<dyn VulnerabilityFinder>>,
    pub exploit_finder: Option<Arc<dyn ExploitFinder>>,
    pub msf: Option<Arc<dyn MsfRpc>>,
    pub config: AttackConfig,
}

impl AttackContext {
    pub fn new(mapper: Arc<dyn PortMapper>, config: AttackConfig) -> Self {
        Self {
            mapper,
            vulnerability_finder: None,
            exploit_finder: None,
            msf: None,
            config,
        }
    }

    /// Context backed by the configured network mapper
    pub fn from_tools(tools: &Tools, config: AttackConfig) -> Self {
        Self::new(Arc::new(tools.nmap.clone()), config)
    }

    pub fn with_vulnerability_finder(mut self, finder: Arc<dyn VulnerabilityFinder>) -> Self {
        self.vulnerability_finder = Some(finder);
        self
    }

    pub fn with_exploit_finder(mut self, finder: Arc<dyn ExploitFinder>) -> Self {
        self.exploit_finder = Some(finder);
        self
    }

    pub fn with_msf(mut self, msf: Arc<dyn MsfRpc>) -> Self {
        self.msf = Some(msf);
        self
    }
}

impl fmt::Debug for AttackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttackContext")
            .field("vulnerability_finder", &self.vulnerability_finder.is_some())
            .field("exploit_finder", &self.exploit_finder.is_some())
            .field("msf", &self.msf.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_set_iterates_in_pipeline_order() {
        let set = StageSet::new()
            .with(Stage::Exploit)
            .with(Stage::Scan)
            .with(Stage::Trace);
        let order: Vec<Stage> = set.iter().collect();
        assert_eq!(order, vec![Stage::Trace, Stage::Scan, Stage::Exploit]);
    }

    #[test]
    fn test_stage_set_from_names() {
        let set: StageSet = "inspect, scan".parse().unwrap();
        assert_eq!(set.to_string(), "scan,inspect");
        assert!("scan,fly".parse::<StageSet>().is_err());
    }

    #[test]
    fn test_stage_set_flags() {
        let set = StageSet::from_flags(2 | 4 | 16).unwrap();
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Stage::Scan, Stage::Inspect, Stage::Exploit]
        );
        assert_eq!(set.flags(), 22);
        assert_eq!(StageSet::all().flags(), 63);
        assert!(StageSet::from_flags(64).is_err());
    }
}
