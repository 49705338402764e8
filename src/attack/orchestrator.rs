//! Multi Attack - run a stage set against many targets at once
//!
//! One worker task per target. The orchestrator reports progress while
//! they run; on cancellation it gives them a bounded grace period to unwind
//! before aborting what is left. Aborted workers kill their subprocess from
//! a drop guard, so nothing outlives the run.

use super::progress::{LogProgress, ProgressSink};
use super::worker::{TargetWorker, WorkerState};
use super::{AttackContext, StageSet};
use crate::network::Target;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One request: these targets, these stages
#[derive(Debug, Clone)]
pub struct AttackJob {
    pub targets: Vec<Target>,
    pub stages: StageSet,
}

impl AttackJob {
    pub fn new(targets: Vec<Target>, stages: StageSet) -> Self {
        Self { targets, stages }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub completed: usize,
    pub interrupted: usize,
    pub cancelled: usize,
    pub status: JobStatus,
}

impl JobSummary {
    /// Targets whose pipeline ran to an end, successful or not
    pub fn processed(&self) -> usize {
        self.completed + self.interrupted
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {}/{} processed ({} completed, {} interrupted, {} cancelled)",
            self.status,
            self.processed(),
            self.total,
            self.completed,
            self.interrupted,
            self.cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    pub state: WorkerState,
}

/// Outcome of a run. Targets come back in submission order.
///
/// A worker that had to be aborted after the cancel grace period cannot hand
/// its target back; its entry holds the target as it was submitted, without
/// any finding recorded during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
    pub summary: JobSummary,
}

/// Extra wait granted to `cancel` on top of the grace period, covering the
/// abort of workers that ignored it
const CANCEL_ACK_SLACK: Duration = Duration::from_secs(1);

/// Runs attack jobs. One instance may run several jobs one after the
/// other; each run gets its own cancellation token.
pub struct MultiAttack {
    ctx: Arc<AttackContext>,
    progress: Arc<dyn ProgressSink>,
    current: Mutex<Option<CancellationToken>>,
    running: watch::Sender<bool>,
}

impl fmt::Debug for MultiAttack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiAttack")
            .field("ctx", &self.ctx)
            .field("running", &*self.running.borrow())
            .finish()
    }
}

impl MultiAttack {
    pub fn new(ctx: AttackContext) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            progress: Arc::new(LogProgress::default()),
            current: Mutex::new(None),
            running,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Interrupt every running worker and wait until the run has unwound:
    /// every worker acknowledged, or the grace period ran out and the rest
    /// were aborted. Without a run in flight this does nothing. Calling it
    /// again is harmless.
    pub async fn cancel(&self) {
        let token = self.current().clone();
        let Some(token) = token else {
            return;
        };
        token.cancel();

        let mut running = self.running.subscribe();
        let limit = self.ctx.config.cancel_grace() + CANCEL_ACK_SLACK;
        if timeout(limit, running.wait_for(|running| !*running)).await.is_err() {
            warn!("run did not acknowledge cancellation within {:?}", limit);
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// True when the run in flight, or the last one, was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.current().as_ref().is_some_and(|token| token.is_cancelled())
    }

    pub async fn run(&self, job: AttackJob) -> JobReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = job.targets.len();
        let cancel = CancellationToken::new();
        *self.current() = Some(cancel.clone());
        self.running.send_replace(true);
        info!("job {}: attacking {} targets with stages [{}]", id, total, job.stages);

        let mut slots: Vec<TargetReport> = Vec::with_capacity(total);
        let mut aborts: Vec<AbortHandle> = Vec::with_capacity(total);
        let mut running = FuturesUnordered::new();

        for (index, target) in job.targets.into_iter().enumerate() {
            slots.push(TargetReport {
                target: target.clone(),
                state: WorkerState::Pending,
            });
            let worker = TargetWorker::new(
                target,
                job.stages.clone(),
                Arc::clone(&self.ctx),
                cancel.child_token(),
            );
            let task = tokio::spawn(worker.run());
            aborts.push(task.abort_handle());
            running.push(async move { (index, task.await) });
        }

        let mut ticker = interval(self.ctx.config.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut done = 0;
        let mut cancelling = false;
        let mut grace_deadline: Option<Instant> = None;

        while !running.is_empty() {
            tokio::select! {
                Some((index, joined)) = running.next() => {
                    settle(&mut slots[index], joined);
                    done += 1;
                    self.progress.on_progress(done, total);
                }
                _ = ticker.tick() => self.progress.on_progress(done, total),
                _ = cancel.cancelled(), if !cancelling => {
                    cancelling = true;
                    info!("cancelling {} running workers", running.len());
                    grace_deadline = Some(Instant::now() + self.ctx.config.cancel_grace());
                }
                _ = wait_until(grace_deadline) => {
                    warn!("{} workers ignored cancellation, aborting them", running.len());
                    for abort in &aborts {
                        abort.abort();
                    }
                    grace_deadline = None;
                }
            }
        }

        let summary = summarize(&slots, cancel.is_cancelled());
        self.progress.on_finished(&summary);
        self.running.send_replace(false);

        JobReport {
            id,
            started_at,
            finished_at: Utc::now(),
            targets: slots,
            summary,
        }
    }
}

/// Record how one worker task ended. An aborted task never returned its
/// target, so the submitted snapshot in `slot` stays.
fn settle(slot: &mut TargetReport, joined: std::result::Result<(Target, WorkerState), JoinError>) {
    match joined {
        Ok((target, state)) => {
            debug!("{}: {}", target, state);
            *slot = TargetReport { target, state };
        }
        Err(e) if e.is_cancelled() => {
            warn!("worker for {} aborted, its findings are lost", slot.target);
            slot.state = WorkerState::Cancelled;
        }
        Err(e) => {
            error!("worker for {} failed: {}", slot.target, e);
            slot.state = WorkerState::Interrupted(format!("worker failed: {}", e));
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

fn summarize(reports: &[TargetReport], cancelled: bool) -> JobSummary {
    let mut summary = JobSummary {
        total: reports.len(),
        completed: 0,
        interrupted: 0,
        cancelled: 0,
        status: if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        },
    };
    for report in reports {
        match report.state {
            WorkerState::Completed => summary.completed += 1,
            WorkerState::Interrupted(_) => summary.interrupted += 1,
            _ => summary.cancelled += 1,
        }
    }
    summary
}
