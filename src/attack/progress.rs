//! Progress reporting for attack jobs

use super::orchestrator::{JobStatus, JobSummary};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::sync::Mutex;

/// Receives job progress. Called from the orchestrator task only.
pub trait ProgressSink: Send + Sync {
    /// `done` counts completed and interrupted targets
    fn on_progress(&self, done: usize, total: usize);

    fn on_finished(&self, summary: &JobSummary);
}

/// Writes progress to the log, skipping repeated counts
#[derive(Debug, Default)]
pub struct LogProgress {
    last: Mutex<Option<(usize, usize)>>,
}

impl ProgressSink for LogProgress {
    fn on_progress(&self, done: usize, total: usize) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last != Some((done, total)) {
            *last = Some((done, total));
            info!("{}/{} targets processed", done, total);
        }
    }

    fn on_finished(&self, summary: &JobSummary) {
        info!("{}", summary);
    }
}

/// Terminal progress bar
#[derive(Debug)]
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message("targets");
        Self { bar }
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, done: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
        self.bar.tick();
    }

    fn on_finished(&self, summary: &JobSummary) {
        self.bar.set_position(summary.processed() as u64);
        match summary.status {
            JobStatus::Cancelled => self.bar.abandon_with_message("cancelled"),
            _ => self.bar.finish_with_message("done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_progress_tracks_counts() {
        let progress = ConsoleProgress::new(3);
        progress.on_progress(2, 3);
        assert_eq!(progress.bar.position(), 2);
        progress.on_finished(&JobSummary {
            total: 3,
            completed: 2,
            interrupted: 1,
            cancelled: 0,
            status: JobStatus::Completed,
        });
        assert_eq!(progress.bar.position(), 3);
        assert!(progress.bar.is_finished());
    }
}
