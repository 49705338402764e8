//! External tools bound to the process supervisor
//!
//! A [`Tool`] is a command template plus environment. Tools are invoked
//! either synchronously ([`Tool::run`]) or asynchronously
//! ([`Tool::run_async`]); the latter hands every event to an
//! [`EventReceiver`] from a dedicated dispatcher task, in production order,
//! followed by exactly one lifecycle callback.

pub mod arpspoof;
pub mod hydra;
pub mod nmap;

use crate::config::{ToolConfig, ToolsConfig};
use crate::events::{ArpSpoofParser, Event, HydraParser, NmapParser, OutputParser};
use crate::process::{ProcessExit, ProcessHandle, ProcessSupervisor, SpawnRequest, SIGKILL};
use crate::{DeimosError, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use arpspoof::{ArpSpoof, ArpSpoofReceiver};
pub use hydra::{CrackRequest, Credential, FoundLogin, Hydra, HydraReceiver};
pub use nmap::{Nmap, NmapReceiver};

/// Consumer of one child's events
///
/// Callbacks for a single child never run concurrently, so implementors
/// need no locking for their own state.
pub trait EventReceiver: Send + 'static {
    fn on_event(&mut self, event: Event);

    /// The child exited normally
    fn on_end(&mut self, _exit_code: i32) {}

    /// The child was killed by a signal
    fn on_death(&mut self, _signal: i32) {}
}

/// Receiver that only remembers what it was given
#[derive(Debug, Default)]
pub struct EventCollector {
    pub events: Vec<Event>,
    pub exit: Option<ProcessExit>,
}

impl EventReceiver for EventCollector {
    fn on_event(&mut self, event: Event) {
        self.events.push(event);
    }

    fn on_end(&mut self, exit_code: i32) {
        self.exit = Some(ProcessExit::Exited(exit_code));
    }

    fn on_death(&mut self, signal: i32) {
        self.exit = Some(ProcessExit::Killed(signal));
    }
}

/// An asynchronous tool invocation in flight
#[derive(Debug)]
pub struct ToolRun<R> {
    process: Arc<ProcessHandle>,
    dispatcher: JoinHandle<R>,
}

impl<R: EventReceiver> ToolRun<R> {
    pub fn process(&self) -> &Arc<ProcessHandle> {
        &self.process
    }

    pub fn kill(&self, signal: i32) -> Result<()> {
        self.process.kill(signal)
    }

    /// Guard that kills the child if dropped while armed
    pub fn guard(&self) -> ProcessGuard {
        ProcessGuard::new(Arc::clone(&self.process))
    }

    /// Wait until every event was dispatched and the lifecycle callback ran,
    /// then hand the receiver back.
    pub async fn join(self) -> Result<(ProcessExit, R)> {
        let receiver = self.dispatcher.await.map_err(|e| {
            DeimosError::interrupted(format!(
                "event dispatch for '{}' failed: {}",
                self.process.command_line(),
                e
            ))
        })?;
        Ok((self.process.wait().await, receiver))
    }

    /// Like [`join`](Self::join), but a cancellation kills the child first.
    /// The receiver still comes back with whatever was delivered before the
    /// child died; callers check the token to tell the two cases apart.
    pub async fn join_until(self, cancel: &CancellationToken) -> Result<(ProcessExit, R)> {
        let process = Arc::clone(&self.process);
        let joined = self.join();
        tokio::pin!(joined);

        tokio::select! {
            result = &mut joined => result,
            _ = cancel.cancelled() => {
                debug!("cancelling '{}'", process.command_line());
                process.kill(SIGKILL)?;
                joined.await
            }
        }
    }
}

/// Kills a child when dropped unless disarmed. Keeps an aborted task from
/// leaving its subprocess behind.
#[derive(Debug)]
pub struct ProcessGuard {
    process: Arc<ProcessHandle>,
    armed: bool,
}

impl ProcessGuard {
    pub fn new(process: Arc<ProcessHandle>) -> Self {
        Self {
            process,
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.armed && self.process.is_running() {
            if let Err(e) = self.process.kill(SIGKILL) {
                warn!("cannot kill #{}: {}", self.process.id(), e);
            }
        }
    }
}

/// A named external command bound to the supervisor
#[derive(Clone)]
pub struct Tool {
    name: String,
    config: ToolConfig,
    parser: Arc<dyn OutputParser>,
    stdin: bool,
    supervisor: ProcessSupervisor,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("parser", &self.parser.name())
            .field("stdin", &self.stdin)
            .finish()
    }
}

impl Tool {
    pub fn new<S: Into<String>>(
        name: S,
        config: ToolConfig,
        parser: Arc<dyn OutputParser>,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            parser,
            stdin: false,
            supervisor,
        }
    }

    /// Keep a pipe to the child's stdin
    pub fn with_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Verify the tool is enabled and its binary is executable
    pub fn check(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(DeimosError::ToolDisabled(self.name.clone()));
        }
        let path = self.resolve_binary().ok_or_else(|| {
            DeimosError::ToolDisabled(format!(
                "{}: '{}' not found",
                self.name,
                self.config.path.display()
            ))
        })?;
        if is_executable(&path) {
            Ok(())
        } else {
            Err(DeimosError::ToolDisabled(format!(
                "{}: '{}' is not executable",
                self.name,
                path.display()
            )))
        }
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        let path = &self.config.path;
        if path.components().count() > 1 {
            return path.exists().then(|| path.clone());
        }
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        dirs.extend(self.config.path_extension.iter().cloned());
        dirs.into_iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
    }

    fn request(&self, args: Vec<String>) -> Result<SpawnRequest> {
        if !self.is_enabled() {
            return Err(DeimosError::ToolDisabled(self.name.clone()));
        }

        let mut request = SpawnRequest::new(&self.config.path)
            .args(self.config.args.iter().cloned())
            .args(args)
            .with_stdin(self.stdin)
            .parser(Arc::clone(&self.parser));

        if let Some(dir) = &self.config.workdir {
            request = request.workdir(dir);
        }
        for (key, value) in &self.config.env {
            request = request.env(key, value);
        }
        if !self.config.path_extension.is_empty() {
            let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default();
            paths.extend(self.config.path_extension.iter().cloned());
            let joined = std::env::join_paths(paths)
                .map_err(|e| DeimosError::ConfigError(format!("bad PATH extension: {}", e)))?;
            request = request.env("PATH", joined.to_string_lossy());
        }
        Ok(request)
    }

    /// Start the tool without consuming its events
    pub fn spawn(&self, args: Vec<String>) -> Result<Arc<ProcessHandle>> {
        self.supervisor.spawn(self.request(args)?)
    }

    /// Run to completion and return every event with the exit
    pub async fn run(&self, args: Vec<String>) -> Result<(ProcessExit, Vec<Event>)> {
        let process = self.spawn(args)?;
        let events = match process.events() {
            Some(stream) => stream.collect_all().await,
            None => Vec::new(),
        };
        Ok((process.wait().await, events))
    }

    /// Start the tool and dispatch its events to `receiver` in the background
    pub fn run_async<R: EventReceiver>(&self, args: Vec<String>, receiver: R) -> Result<ToolRun<R>> {
        let process = self.spawn(args)?;
        let events = process.events();
        let watched = Arc::clone(&process);

        let dispatcher = tokio::spawn(async move {
            let mut receiver = receiver;
            if let Some(mut events) = events {
                while let Some(event) = events.recv().await {
                    receiver.on_event(event);
                }
            }
            match watched.wait().await {
                ProcessExit::Exited(code) => receiver.on_end(code),
                ProcessExit::Killed(signal) => receiver.on_death(signal),
            }
            receiver
        });

        Ok(ToolRun {
            process,
            dispatcher,
        })
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Every tool deimos knows, configured and bound to one supervisor
#[derive(Debug, Clone)]
pub struct Tools {
    pub nmap: Nmap,
    pub arpspoof: ArpSpoof,
    pub hydra: Hydra,
}

impl Tools {
    pub fn new(config: &ToolsConfig, supervisor: &ProcessSupervisor) -> Self {
        Self {
            nmap: Nmap::new(Tool::new(
                "nmap",
                config.nmap.clone(),
                Arc::new(NmapParser),
                supervisor.clone(),
            )),
            arpspoof: ArpSpoof::new(Tool::new(
                "arpspoof",
                config.arpspoof.clone(),
                Arc::new(ArpSpoofParser),
                supervisor.clone(),
            )),
            hydra: Hydra::new(Tool::new(
                "hydra",
                config.hydra.clone(),
                Arc::new(HydraParser),
                supervisor.clone(),
            )),
        }
    }

    /// Log which tools cannot be used
    pub fn report_unavailable(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for tool in [self.nmap.tool(), self.arpspoof.tool(), self.hydra.tool()] {
            if let Err(e) = tool.check() {
                warn!("{}", e);
                missing.push(tool.name().to_string());
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RawParser, Severity};

    fn sh_tool(supervisor: &ProcessSupervisor) -> Tool {
        Tool::new(
            "sh",
            ToolConfig::new("sh").with_args(["-c"]),
            Arc::new(RawParser),
            supervisor.clone(),
        )
    }

    #[tokio::test]
    async fn test_run_collects_events() {
        let supervisor = ProcessSupervisor::default();
        let tool = sh_tool(&supervisor);
        let (exit, events) = tool
            .run(vec!["echo one; echo two >&2; exit 3".to_string()])
            .await
            .unwrap();

        assert_eq!(exit, ProcessExit::Exited(3));
        assert!(events.contains(&Event::message(Severity::Info, "one")));
        assert!(events.contains(&Event::message(Severity::Warning, "two")));
    }

    #[tokio::test]
    async fn test_disabled_tool_refuses() {
        let supervisor = ProcessSupervisor::default();
        let tool = Tool::new(
            "sh",
            ToolConfig::new("sh").disabled(),
            Arc::new(RawParser),
            supervisor,
        );
        assert!(matches!(tool.check(), Err(DeimosError::ToolDisabled(_))));
        assert!(matches!(
            tool.spawn(Vec::new()),
            Err(DeimosError::ToolDisabled(_))
        ));
    }

    #[tokio::test]
    async fn test_env_and_path_extension() {
        let supervisor = ProcessSupervisor::default();
        let tool = Tool::new(
            "sh",
            ToolConfig::new("sh")
                .with_args(["-c"])
                .with_env("DEIMOS_MARKER", "hello")
                .with_path_extension("/opt/msf"),
            Arc::new(RawParser),
            supervisor,
        );
        let (_, events) = tool
            .run(vec!["echo $DEIMOS_MARKER; echo $PATH".to_string()])
            .await
            .unwrap();
        assert_eq!(events[0], Event::message(Severity::Info, "hello"));
        match &events[1] {
            Event::LogMessage { text, .. } => assert!(text.ends_with(":/opt/msf")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_check_finds_sh_on_path() {
        let tool = Tool::new(
            "sh",
            ToolConfig::new("sh"),
            Arc::new(RawParser),
            ProcessSupervisor::default(),
        );
        assert!(tool.check().is_ok());
    }

    #[tokio::test]
    async fn test_guard_kills_on_drop() {
        let supervisor = ProcessSupervisor::default();
        let tool = sh_tool(&supervisor);
        let run = tool
            .run_async(vec!["sleep 30".to_string()], EventCollector::default())
            .unwrap();
        drop(run.guard());
        let (exit, collector) = run.join().await.unwrap();
        assert_eq!(exit, ProcessExit::Killed(SIGKILL));
        assert_eq!(collector.exit, Some(ProcessExit::Killed(SIGKILL)));
    }
}
