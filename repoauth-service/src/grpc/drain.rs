//! Cancellation of in-flight handler work at the drain deadline.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared between the RPC handlers and the shutdown sequence.
///
/// Handlers run their work through [`DrainGuard::run`]. Once the drain
/// deadline passes, [`DrainGuard::abandon`] makes every pending and future
/// call resolve to `None` so the handler can answer `UNAVAILABLE`.
#[derive(Clone, Default)]
pub struct DrainGuard {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl DrainGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` to completion unless the guard is abandoned first.
    pub async fn run<F>(&self, work: F) -> Option<F::Output>
    where
        F: Future,
    {
        let token = self.token.clone();
        self.tracker
            .track_future(async move {
                tokio::select! {
                    output = work => Some(output),
                    _ = token.cancelled() => None,
                }
            })
            .await
    }

    pub fn abandon(&self) {
        self.token.cancel();
    }

    pub fn is_abandoned(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of handler calls currently inside [`DrainGuard::run`].
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every tracked call to return.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completed_work_is_returned() {
        let guard = DrainGuard::new();
        assert_eq!(guard.run(async { 7 }).await, Some(7));
        assert_eq!(guard.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandon_cuts_off_pending_work() {
        let guard = DrainGuard::new();
        let worker = guard.clone();
        let handle = tokio::spawn(async move {
            worker
                .run(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(guard.in_flight(), 1);

        guard.abandon();
        let output = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("abandoned work should return promptly")
            .unwrap();
        assert!(output.is_none());
        assert!(guard.is_abandoned());
    }

    #[tokio::test]
    async fn work_started_after_abandon_does_not_run() {
        let guard = DrainGuard::new();
        guard.abandon();
        let output = guard
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert!(output.is_none());
    }

    #[tokio::test]
    async fn wait_idle_waits_for_running_work() {
        let guard = DrainGuard::new();
        let worker = guard.clone();
        let handle = tokio::spawn(async move {
            worker
                .run(tokio::time::sleep(Duration::from_millis(200)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), guard.wait_idle())
            .await
            .expect("tracked work should finish");
        assert_eq!(guard.in_flight(), 0);
        assert!(handle.await.unwrap().is_some());
    }
}
