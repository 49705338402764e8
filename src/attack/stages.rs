//! Stage Runner - one pipeline stage against one target
//!
//! Every stage blocks until its asynchronous work has signalled completion.
//! Tool and collaborator failures are turned into stage interruptions here
//! and never travel further up as raw errors.

use super::finder::FinderReceiver;
use super::{AttackContext, ExploitFinder, Stage};
use crate::network::{Port, Protocol, Target};
use crate::process::ProcessExit;
use crate::tools::nmap::NmapEvents;
use crate::tools::{Nmap, NmapReceiver, ToolRun};
use crate::{DeimosError, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Port discovery backend used by the scan and inspect stages
pub trait PortMapper: Send + Sync {
    fn syn_scan(&self, target: &Target, recorder: PortRecorder) -> Result<ToolRun<NmapEvents<PortRecorder>>>;

    fn inspect(
        &self,
        target: &Target,
        recorder: PortRecorder,
        focus_on_known_ports: bool,
    ) -> Result<ToolRun<NmapEvents<PortRecorder>>>;
}

impl PortMapper for Nmap {
    fn syn_scan(&self, target: &Target, recorder: PortRecorder) -> Result<ToolRun<NmapEvents<PortRecorder>>> {
        Nmap::syn_scan(self, target, recorder, None)
    }

    fn inspect(
        &self,
        target: &Target,
        recorder: PortRecorder,
        focus_on_known_ports: bool,
    ) -> Result<ToolRun<NmapEvents<PortRecorder>>> {
        Nmap::inspect(self, target, recorder, focus_on_known_ports)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TargetUpdate {
    Port(Port),
    Os(String),
    Device(String),
}

/// Collects mapper findings while the tool runs; they are applied to the
/// target once the run has been joined.
#[derive(Debug, Default)]
pub struct PortRecorder {
    detailed: bool,
    updates: Vec<TargetUpdate>,
}

impl PortRecorder {
    /// Records open ports only
    pub fn ports_only() -> Self {
        Self::default()
    }

    /// Also records services, OS and device type
    pub fn detailed() -> Self {
        Self {
            detailed: true,
            updates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn apply(self, target: &mut Target) {
        for update in self.updates {
            match update {
                TargetUpdate::Port(port) => target.add_open_port(port),
                TargetUpdate::Os(os) => target.set_device_os(os),
                TargetUpdate::Device(device) => target.set_device_type(device),
            }
        }
    }
}

impl NmapReceiver for PortRecorder {
    fn on_port_found(&mut self, port: u16, protocol: Protocol) {
        self.updates.push(TargetUpdate::Port(Port::new(port, protocol)));
    }

    fn on_service_found(&mut self, port: Port) {
        let port = if self.detailed {
            port
        } else {
            Port::new(port.number, port.protocol)
        };
        self.updates.push(TargetUpdate::Port(port));
    }

    fn on_os_found(&mut self, os: String) {
        if self.detailed {
            self.updates.push(TargetUpdate::Os(os));
        }
    }

    fn on_device_found(&mut self, device_type: String) {
        if self.detailed {
            self.updates.push(TargetUpdate::Device(device_type));
        }
    }
}

/// Runs stages for one worker. Cancelling the token kills whatever the
/// running stage is waiting on.
#[derive(Debug)]
pub struct StageRunner {
    ctx: Arc<AttackContext>,
    cancel: CancellationToken,
}

impl StageRunner {
    pub fn new(ctx: Arc<AttackContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    pub async fn run(&self, stage: Stage, target: &mut Target) -> Result<()> {
        match stage {
            Stage::Trace => self.trace(target),
            Stage::Scan => self.scan(target).await,
            Stage::Inspect => self.inspect(target).await,
            Stage::Vuln => self.vuln(target, true).await,
            Stage::Exploit => self.exploit(target).await,
            Stage::Crack => self.crack(target),
        }
    }

    fn trace(&self, target: &Target) -> Result<()> {
        debug!("trace of {} not implemented, skipping", target);
        Ok(())
    }

    fn crack(&self, target: &Target) -> Result<()> {
        debug!("crack of {} not implemented, skipping", target);
        Ok(())
    }

    pub async fn scan(&self, target: &mut Target) -> Result<()> {
        let run = self
            .ctx
            .mapper
            .syn_scan(target, PortRecorder::ports_only())
            .map_err(|e| stage_failure(Stage::Scan, e))?;
        self.finish_tool_run(Stage::Scan, run, target).await
    }

    pub async fn inspect(&self, target: &mut Target) -> Result<()> {
        let run = self
            .ctx
            .mapper
            .inspect(target, PortRecorder::detailed(), target.has_open_ports())
            .map_err(|e| stage_failure(Stage::Inspect, e))?;
        self.finish_tool_run(Stage::Inspect, run, target).await
    }

    async fn finish_tool_run(
        &self,
        stage: Stage,
        run: ToolRun<NmapEvents<PortRecorder>>,
        target: &mut Target,
    ) -> Result<()> {
        let _guard = run.guard();
        let (exit, events) = run
            .join_until(&self.cancel)
            .await
            .map_err(|e| stage_failure(stage, e))?;

        // findings delivered before a kill are still real
        events.into_inner().apply(target);

        if self.cancel.is_cancelled() {
            return Err(DeimosError::Cancelled);
        }
        match exit {
            ProcessExit::Killed(signal) => Err(DeimosError::interrupted(format!(
                "{} of {} killed by signal {}",
                stage, target, signal
            ))),
            ProcessExit::Exited(0) => Ok(()),
            ProcessExit::Exited(code) => {
                warn!("{} of {} exited with code {}", stage, target, code);
                Ok(())
            }
        }
    }

    /// Vulnerability search. Without a finder, or without anything to match
    /// on, this is a no-op.
    pub async fn vuln(&self, target: &mut Target, search_versions: bool) -> Result<()> {
        let Some(finder) = &self.ctx.vulnerability_finder else {
            debug!("no vulnerability finder, skipping {}", target);
            return Ok(());
        };

        let searchable = if search_versions {
            target.has_versioned_services()
        } else {
            target.has_open_ports_with_service()
        };
        if !searchable {
            debug!("{} has no services to search vulnerabilities for", target);
            return Ok(());
        }

        let (receiver, results) = FinderReceiver::channel();
        let _search = finder.search(target, receiver, search_versions);
        let found = results
            .collect("vulnerability search", self.ctx.config.finder_timeout(), &self.cancel)
            .await?;

        debug!("{} vulnerabilities found for {}", found.len(), target);
        for vulnerability in found {
            target.add_vulnerability(vulnerability);
        }
        Ok(())
    }

    /// Exploit search, with the vulnerability prerequisite and one retry
    /// without version narrowing when nothing turned up.
    pub async fn exploit(&self, target: &mut Target) -> Result<()> {
        let Some(finder) = self.ctx.exploit_finder.clone() else {
            debug!("no exploit finder, skipping {}", target);
            return Ok(());
        };

        let mut no_version_searched = false;
        if !target.has_vulnerabilities() {
            no_version_searched = true;
            self.vuln(target, false).await?;
            if !target.has_vulnerabilities() {
                debug!("{} has no vulnerabilities, no exploits to search", target);
                return Ok(());
            }
        }

        self.search_exploits(finder.as_ref(), target).await?;

        if !no_version_searched && !target.has_exploits() {
            self.vuln(target, false).await?;
            self.search_exploits(finder.as_ref(), target).await?;
        }

        self.launch_best_exploit(target).await
    }

    async fn search_exploits(&self, finder: &dyn ExploitFinder, target: &mut Target) -> Result<()> {
        let (receiver, results) = FinderReceiver::channel();
        let _search = finder.search(target, receiver);
        let found = results
            .collect("exploit search", self.ctx.config.finder_timeout(), &self.cancel)
            .await?;

        debug!("{} exploits found for {}", found.len(), target);
        for exploit in found {
            target.add_exploit(exploit);
        }
        Ok(())
    }

    async fn launch_best_exploit(&self, target: &Target) -> Result<()> {
        if !self.ctx.config.auto_launch {
            return Ok(());
        }
        let Some(msf) = &self.ctx.msf else {
            return Ok(());
        };
        if !msf.is_connected() {
            debug!("exploitation framework not connected, not launching against {}", target);
            return Ok(());
        }
        let Some(exploit) = target.best_msf_exploit() else {
            return Ok(());
        };

        info!("launching {} against {}", exploit.name, target);
        tokio::select! {
            launched = msf.launch(exploit, target) => {
                if let Err(e) = launched {
                    warn!("launching {} against {} failed: {}", exploit.name, target, e);
                }
                Ok(())
            }
            _ = self.cancel.cancelled() => Err(DeimosError::Cancelled),
        }
    }
}

/// Everything except cancellation stops only this target's pipeline
fn stage_failure(stage: Stage, e: DeimosError) -> DeimosError {
    match e {
        DeimosError::Cancelled | DeimosError::StageInterrupted(_) => e,
        other => DeimosError::interrupted(format!("{}: {}", stage, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn target() -> Target {
        Target::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn test_ports_only_recorder_drops_details() {
        let mut recorder = PortRecorder::ports_only();
        recorder.on_port_found(22, Protocol::Tcp);
        recorder.on_service_found(Port::new(80, Protocol::Tcp).with_service("http"));
        recorder.on_os_found("Linux".to_string());

        let mut target = target();
        recorder.apply(&mut target);
        assert_eq!(target.ports().len(), 2);
        assert!(!target.has_open_ports_with_service());
        assert_eq!(target.device_os(), None);
    }

    #[test]
    fn test_detailed_recorder_merges_services() {
        let mut target = target();
        target.add_open_port(Port::new(22, Protocol::Tcp));

        let mut recorder = PortRecorder::detailed();
        recorder.on_service_found(
            Port::new(22, Protocol::Tcp)
                .with_service("ssh")
                .with_version("OpenSSH 9.6"),
        );
        recorder.on_device_found("general purpose".to_string());
        recorder.apply(&mut target);

        assert_eq!(target.ports().len(), 1);
        assert!(target.has_versioned_services());
        assert_eq!(target.device_type(), Some("general purpose"));
    }

    #[test]
    fn test_stage_failure_wraps_spawn_errors() {
        let wrapped = stage_failure(
            Stage::Scan,
            DeimosError::ProcessNotStarted {
                command: "nmap".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        );
        assert!(matches!(wrapped, DeimosError::StageInterrupted(_)));
        assert!(stage_failure(Stage::Scan, DeimosError::Cancelled).is_cancellation());
    }
}
