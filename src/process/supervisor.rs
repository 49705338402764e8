//! Process Supervisor - spawn, track and reclaim external processes
//!
//! Every child is started in its own process group so that signals reach
//! wrapper shells and everything they started. The live set is the only
//! state shared by every worker, so it lives in a concurrent map.

use super::handle::{EventStream, ProcessHandle};
use super::{ChildId, ProcessExit, ProcessState, SIGKILL, SIGTERM};
use crate::config::SupervisorConfig;
use crate::events::{Event, OutputParser, RawParser, StreamKind};
use crate::{DeimosError, Result};
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Extra time granted to children after SIGKILL during shutdown
const FORCE_KILL_WAIT: Duration = Duration::from_secs(5);

/// Everything needed to start one child
#[derive(Clone)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Keep a pipe to the child's stdin
    pub stdin: bool,
    pub parser: Arc<dyn OutputParser>,
}

impl SpawnRequest {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: HashMap::new(),
            stdin: false,
            parser: Arc::new(RawParser),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdin(mut self, stdin: bool) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Human readable command line, for logs and errors
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl std::fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("command_line", &self.command_line())
            .field("workdir", &self.workdir)
            .field("stdin", &self.stdin)
            .field("parser", &self.parser.name())
            .finish()
    }
}

#[derive(Debug)]
struct Registry {
    live: DashMap<ChildId, Arc<ProcessHandle>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Held shared from the closed check until the child is in `live`;
    /// closing takes it exclusively, so no spawn straddles the close.
    gate: RwLock<()>,
    grace: Duration,
}

/// Process-wide owner of every spawned child
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    registry: Arc<Registry>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(&SupervisorConfig::default())
    }
}

impl ProcessSupervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            registry: Arc::new(Registry {
                live: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                gate: RwLock::new(()),
                grace: config.shutdown_grace(),
            }),
        }
    }

    /// Start a child and begin classifying its output
    pub fn spawn(&self, request: SpawnRequest) -> Result<Arc<ProcessHandle>> {
        let _gate = match self.registry.gate.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_closed() {
            return Err(DeimosError::SupervisorClosed);
        }

        let command_line = request.command_line();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(ProcessState::Starting);

        let mut child = match request.build_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                state_tx.send_replace(ProcessState::FailedToStart(source.to_string()));
                warn!("cannot start #{} '{}': {}", id, command_line, source);
                return Err(DeimosError::ProcessNotStarted {
                    command: command_line,
                    source,
                });
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pid = child.id();
        let handle = Arc::new(ProcessHandle::new(
            id,
            pid,
            command_line.clone(),
            state_rx,
            EventStream::new(events_rx),
            child.stdin.take(),
        ));
        state_tx.send_replace(ProcessState::Running);
        self.registry.live.insert(id, Arc::clone(&handle));
        debug!("started #{} (pid {:?}): {}", id, pid, command_line);

        let stdout_reader = child.stdout.take().map(|out| {
            tokio::spawn(read_lines(out, StreamKind::Stdout, Arc::clone(&request.parser), events_tx.clone()))
        });
        let stderr_reader = child.stderr.take().map(|err| {
            tokio::spawn(read_lines(err, StreamKind::Stderr, Arc::clone(&request.parser), events_tx.clone()))
        });

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from(status),
                Err(e) => {
                    error!("cannot wait for #{}: {}", id, e);
                    ProcessExit::Killed(SIGKILL)
                }
            };
            for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
                if let Err(e) = reader.await {
                    error!("output reader of #{} failed: {}", id, e);
                }
            }

            registry.live.remove(&id);
            debug!("#{} {}", id, exit);
            state_tx.send_replace(exit.into());
            // last sender: the event stream closes only now
            drop(events_tx);
        });

        Ok(handle)
    }

    pub fn get(&self, id: ChildId) -> Option<Arc<ProcessHandle>> {
        self.registry.live.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of children not yet reaped
    pub fn live_count(&self) -> usize {
        self.registry.live.len()
    }

    pub fn is_closed(&self) -> bool {
        self.registry.closed.load(Ordering::SeqCst)
    }

    /// Refuse new children. Returns once every spawn already in progress
    /// has registered its child.
    fn close(&self) {
        let _gate = match self.registry.gate.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.registry.closed.store(true, Ordering::SeqCst);
    }

    fn live_handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.registry
            .live
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Signal every live child
    pub fn kill_all(&self, signal: i32) {
        for handle in self.live_handles() {
            if let Err(e) = handle.kill(signal) {
                warn!("cannot signal #{}: {}", handle.id(), e);
            }
        }
    }

    /// Refuse new children, terminate the live ones and wait for them.
    /// Children still running after the grace period are killed outright.
    pub async fn shutdown_all(&self) {
        self.close();

        let handles = self.live_handles();
        if handles.is_empty() {
            return;
        }
        info!("terminating {} supervised processes", handles.len());

        for handle in &handles {
            if let Err(e) = handle.kill(SIGTERM) {
                warn!("cannot terminate #{}: {}", handle.id(), e);
            }
        }

        let graceful = join_all(handles.iter().map(|h| h.wait()));
        if timeout(self.registry.grace, graceful).await.is_ok() {
            return;
        }

        for handle in handles.iter().filter(|h| h.is_running()) {
            warn!("#{} ignored SIGTERM, killing '{}'", handle.id(), handle.command_line());
            if let Err(e) = handle.kill(SIGKILL) {
                error!("cannot kill #{}: {}", handle.id(), e);
            }
        }

        let forced = join_all(handles.iter().map(|h| h.wait()));
        if timeout(FORCE_KILL_WAIT, forced).await.is_err() {
            error!("{} processes survived SIGKILL", self.live_count());
        }
    }
}

/// Classify every line of one pipe until end-of-stream
async fn read_lines<R>(
    pipe: R,
    stream: StreamKind,
    parser: Arc<dyn OutputParser>,
    events: mpsc::UnboundedSender<Event>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                // a closed receiver only means nobody listens anymore; keep
                // draining so the child never blocks on a full pipe
                let _ = events.send(parser.classify(&line, stream));
            }
            Ok(None) => break,
            Err(e) => {
                debug!("{:?} reader stopped: {}", stream, e);
                break;
            }
        }
    }
}

/// Deliver `signal` to the process group led by `pid`. An already
/// vanished group is not an error.
pub(crate) fn signal_group(pid: u32, signal: i32) -> Result<()> {
    let pgid = -(pid as i32);
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(DeimosError::IoError(err))
    }
}
