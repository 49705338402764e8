//! Process Handle - one supervised child

use super::{supervisor, ChildId, ProcessExit, ProcessState, SIGKILL};
use crate::events::Event;
use crate::{DeimosError, Result};
use futures::Stream;
use log::debug;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, watch};

/// Ordered events of one child. Ends once the child is dead and both
/// output readers reached end-of-stream.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Next event, `None` after the stream closed
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain everything until the stream closes
    pub async fn collect_all(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

/// A spawned OS process. The supervisor keeps the owning reference; callers
/// get shared references for `wait`/`kill`.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ChildId,
    pid: Option<u32>,
    command_line: String,
    state: watch::Receiver<ProcessState>,
    events: Mutex<Option<EventStream>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl ProcessHandle {
    pub(crate) fn new(
        id: ChildId,
        pid: Option<u32>,
        command_line: String,
        state: watch::Receiver<ProcessState>,
        events: EventStream,
        stdin: Option<ChildStdin>,
    ) -> Self {
        Self {
            id,
            pid,
            command_line,
            state,
            events: Mutex::new(Some(events)),
            stdin: tokio::sync::Mutex::new(stdin),
        }
    }

    pub fn id(&self) -> ChildId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.state.borrow().is_terminated()
    }

    /// Take the event stream. There is exactly one consumer per child, so
    /// this returns `None` on every call after the first.
    pub fn events(&self) -> Option<EventStream> {
        match self.events.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Block until the process has terminated
    pub async fn wait(&self) -> ProcessExit {
        let mut state = self.state.clone();
        loop {
            if let Some(exit) = state.borrow_and_update().exit() {
                return exit;
            }
            if state.changed().await.is_err() {
                // monitor dropped with the runtime; kill_on_drop took the child down
                return state.borrow().exit().unwrap_or(ProcessExit::Killed(SIGKILL));
            }
        }
    }

    /// Send `signal` to the process group. Killing a terminated process is a
    /// no-op.
    pub fn kill(&self, signal: i32) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        match self.pid {
            Some(pid) => {
                debug!("sending signal {} to #{} ({})", signal, self.id, self.command_line);
                supervisor::signal_group(pid, signal)
            }
            None => Ok(()),
        }
    }

    /// Write to the child's stdin, for tools that read commands
    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            DeimosError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("#{} has no stdin", self.id),
            ))
        })?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin so the child sees end-of-file
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }
}
