//! Collaborator seams: vulnerability and exploit finders, exploit launcher

use crate::network::{Exploit, Target, Vulnerability};
use crate::{DeimosError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum FinderMessage<T> {
    Found(Vec<T>),
    End,
}

/// Handed to a collaborator for one search. `end` consumes the receiver,
/// so it can be signalled at most once; dropping the receiver without
/// calling it marks the search as broken.
#[derive(Debug)]
pub struct FinderReceiver<T> {
    tx: mpsc::UnboundedSender<FinderMessage<T>>,
}

impl<T: Send + 'static> FinderReceiver<T> {
    pub(crate) fn channel() -> (Self, FinderResults<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, FinderResults { rx })
    }

    pub fn found(&self, items: Vec<T>) {
        if !items.is_empty() {
            let _ = self.tx.send(FinderMessage::Found(items));
        }
    }

    pub fn end(self) {
        let _ = self.tx.send(FinderMessage::End);
    }
}

/// Waiting side of a [`FinderReceiver`]
#[derive(Debug)]
pub(crate) struct FinderResults<T> {
    rx: mpsc::UnboundedReceiver<FinderMessage<T>>,
}

impl<T> FinderResults<T> {
    /// Gather findings until the end signal. Fails if the collaborator goes
    /// away without signalling, or stays silent past `limit`. Every batch of
    /// findings restarts the clock.
    pub(crate) async fn collect(
        mut self,
        what: &str,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let mut deadline = Instant::now() + limit;
        let mut items = Vec::new();
        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(FinderMessage::Found(found)) => {
                        items.extend(found);
                        deadline = Instant::now() + limit;
                    }
                    Some(FinderMessage::End) => return Ok(items),
                    None => {
                        return Err(DeimosError::interrupted(format!(
                            "{} ended without completion",
                            what
                        )))
                    }
                },
                _ = sleep_until(deadline) => {
                    return Err(DeimosError::interrupted(format!(
                        "{} silent for {:?} without an end signal",
                        what, limit
                    )))
                }
                _ = cancel.cancelled() => return Err(DeimosError::Cancelled),
            }
        }
    }
}

/// Running collaborator search. Dropping it aborts the search task.
#[derive(Debug, Default)]
pub struct SearchHandle {
    abort: Option<AbortHandle>,
}

impl SearchHandle {
    pub fn from_task<T>(task: &JoinHandle<T>) -> Self {
        Self {
            abort: Some(task.abort_handle()),
        }
    }

    /// For searches that cannot be aborted, or that already finished
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

pub trait VulnerabilityFinder: Send + Sync {
    /// Look up vulnerabilities of the target's services. With
    /// `search_versions` only versioned services are matched.
    fn search(
        &self,
        target: &Target,
        receiver: FinderReceiver<Vulnerability>,
        search_versions: bool,
    ) -> SearchHandle;
}

pub trait ExploitFinder: Send + Sync {
    /// Look up exploits for the target's known vulnerabilities
    fn search(&self, target: &Target, receiver: FinderReceiver<Exploit>) -> SearchHandle;
}

/// Remote exploitation framework reached over RPC
#[async_trait]
pub trait MsfRpc: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn launch(&self, exploit: &Exploit, target: &Target) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ExploitRank;

    #[tokio::test]
    async fn test_collect_until_end() {
        let (receiver, results) = FinderReceiver::channel();
        receiver.found(vec![Exploit::local("1", "first", ExploitRank::Low)]);
        receiver.found(Vec::new());
        receiver.found(vec![Exploit::local("2", "second", ExploitRank::Good)]);
        receiver.end();

        let found = results
            .collect("exploit search", Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_interrupts() {
        let (receiver, results) = FinderReceiver::<Exploit>::channel();
        drop(receiver);
        let err = results
            .collect("exploit search", Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeimosError::StageInterrupted(_)));
    }

    #[tokio::test]
    async fn test_silent_collaborator_times_out() {
        let (receiver, results) = FinderReceiver::<Exploit>::channel();
        let err = results
            .collect("exploit search", Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeimosError::StageInterrupted(_)));
        drop(receiver);
    }

    #[tokio::test]
    async fn test_steady_findings_keep_search_alive() {
        let (receiver, results) = FinderReceiver::channel();
        tokio::spawn(async move {
            for i in 0..6 {
                tokio::time::sleep(Duration::from_millis(60)).await;
                receiver.found(vec![Exploit::local(i.to_string(), format!("exploit {}", i), ExploitRank::Normal)]);
            }
            receiver.end();
        });

        // runs well past the limit, but never goes quiet for that long
        let found = results
            .collect("exploit search", Duration::from_millis(200), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 6);
    }

    #[tokio::test]
    async fn test_cancel_wins() {
        let (_receiver, results) = FinderReceiver::<Exploit>::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = results
            .collect("exploit search", Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
