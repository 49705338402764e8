//! Target Worker - the ordered stage sequence for one target

use super::stages::StageRunner;
use super::{AttackContext, Stage, StageSet};
use crate::network::Target;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Pending,
    Running(Stage),
    Completed,
    Interrupted(String),
    Cancelled,
}

impl WorkerState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Interrupted(_) | WorkerState::Cancelled
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Pending => write!(f, "pending"),
            WorkerState::Running(stage) => write!(f, "running {}", stage),
            WorkerState::Completed => write!(f, "completed"),
            WorkerState::Interrupted(reason) => write!(f, "interrupted: {}", reason),
            WorkerState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Owns one target for the duration of a run
#[derive(Debug)]
pub struct TargetWorker {
    target: Target,
    stages: StageSet,
    runner: StageRunner,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl TargetWorker {
    pub fn new(target: Target, stages: StageSet, ctx: Arc<AttackContext>, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(WorkerState::Pending);
        Self {
            target,
            stages,
            runner: StageRunner::new(ctx, cancel.clone()),
            cancel,
            state,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Token that cancels this worker. Cancelling twice is harmless.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run every selected stage in order and hand the target back with the
    /// final state
    pub async fn run(mut self) -> (Target, WorkerState) {
        let final_state = self.run_stages().await;
        self.state.send_replace(final_state.clone());
        (self.target, final_state)
    }

    async fn run_stages(&mut self) -> WorkerState {
        for stage in self.stages.iter() {
            if self.cancel.is_cancelled() {
                return WorkerState::Cancelled;
            }

            self.state.send_replace(WorkerState::Running(stage));
            debug!("{}: {}", self.target, stage);

            if let Err(e) = self.runner.run(stage, &mut self.target).await {
                if e.is_cancellation() {
                    info!("{}: cancelled during {}", self.target, stage);
                    return WorkerState::Cancelled;
                }
                warn!("{}: {}", self.target, e);
                return WorkerState::Interrupted(e.to_string());
            }
        }

        debug!("{} done", self.target);
        WorkerState::Completed
    }
}
