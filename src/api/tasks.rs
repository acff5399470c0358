use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

/// Webhook handling that outlives the request, kept so shutdown can wait
/// for runs already in flight.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(done) = set.try_join_next() {
            log_join(done);
        }
        set.spawn(task);
    }

    /// Tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.set.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `grace` for every task, then aborts the rest. Returns
    /// how many were aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.set.lock().unwrap_or_else(|e| e.into_inner()));
        if !set.is_empty() {
            info!(tasks = set.len(), "waiting for webhook runs to finish");
        }

        let finished = tokio::time::timeout(grace, async {
            while let Some(done) = set.join_next().await {
                log_join(done);
            }
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let left = set.len();
        warn!(tasks = left, grace_secs = grace.as_secs(), "aborting webhook runs still in flight");
        set.shutdown().await;
        left
    }
}

fn log_join(done: Result<(), JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            warn!(error = %e, "webhook run panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn drain_waits_for_running_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(tasks.drain(Duration::from_secs(5)).await, 0);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn drain_aborts_after_grace() {
        let tasks = BackgroundTasks::new();
        let (_keep, rx) = oneshot::channel::<()>();
        tasks.spawn(async move {
            let _ = rx.await;
        });
        tasks.spawn(async {});

        assert_eq!(tasks.drain(Duration::from_millis(50)).await, 1);
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_on_spawn() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert_eq!(tasks.len(), 1);
        tasks.drain(Duration::ZERO).await;
    }
}
