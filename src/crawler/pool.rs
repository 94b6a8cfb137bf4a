//! Bounded worker pool
//!
//! A fixed number of permits limits how many fetch tasks run at once. Callers
//! that cannot get a permit within the acquire timeout are rejected.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// No worker became free in time
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("No worker available after {0:?}")]
pub struct PoolRejected(pub Duration);

/// A reserved worker; dropping it frees the worker again
#[derive(Debug)]
pub struct WorkerSlot(OwnedSemaphorePermit);

/// Runs futures on at most `size` workers
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
            workers: JoinSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently running a task
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Handle for reading the busy count from other tasks
    pub fn load(&self) -> PoolLoad {
        PoolLoad {
            permits: Arc::clone(&self.permits),
            size: self.size,
        }
    }

    /// Waits up to the acquire timeout for a free worker
    pub async fn reserve(&self) -> Result<WorkerSlot, PoolRejected> {
        match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(WorkerSlot(permit)),
            // The semaphore is never closed, so only the timeout rejects
            Ok(Err(_)) | Err(_) => Err(PoolRejected(self.acquire_timeout)),
        }
    }

    /// Runs `task` on a reserved worker
    pub fn run<F>(&mut self, slot: WorkerSlot, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.spawn(async move {
            let _slot = slot;
            task.await;
        });
    }

    /// Reserves a worker and runs `task` on it
    pub async fn spawn<F>(&mut self, task: F) -> Result<(), PoolRejected>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.reserve().await?;
        self.run(slot, task);
        Ok(())
    }

    /// Reaps one finished worker; pending forever when the pool is empty
    pub async fn join_next(&mut self) {
        match self.workers.join_next().await {
            Some(Err(e)) if e.is_panic() => tracing::error!("Fetch worker panicked: {}", e),
            Some(_) => {}
            None => std::future::pending::<()>().await,
        }
    }

    /// Number of spawned workers not yet reaped
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for running workers to finish, then aborts whatever is left
    ///
    /// # Returns
    ///
    /// Number of workers that had to be aborted
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        let finished = tokio::time::timeout(timeout, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }

        let remaining = self.workers.len();
        tracing::warn!("Aborting {} fetch workers after {:?}", remaining, timeout);
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}
        remaining
    }
}

/// Read-only view of a pool's busy count
#[derive(Debug, Clone)]
pub struct PoolLoad {
    permits: Arc<Semaphore>,
    size: usize,
}

impl PoolLoad {
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub fn has_idle_worker(&self) -> bool {
        self.permits.available_permits() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_spawn_runs_task() {
        let mut pool = WorkerPool::new(2, Duration::from_millis(50));
        let (tx, rx) = oneshot::channel();
        pool.spawn(async move {
            let _ = tx.send(42);
        })
        .await
        .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
        assert_eq!(pool.drain(Duration::from_secs(1)).await, 0);
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_when_full() {
        let mut pool = WorkerPool::new(1, Duration::from_secs(10));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.spawn(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        assert_eq!(pool.busy(), 1);
        assert!(!pool.load().has_idle_worker());

        let rejected = pool.spawn(async {}).await;
        assert_eq!(rejected, Err(PoolRejected(Duration::from_secs(10))));

        let _ = release_tx.send(());
        pool.join_next().await;
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stuck_workers() {
        let mut pool = WorkerPool::new(2, Duration::from_secs(1));
        let dropped = Arc::new(AtomicUsize::new(0));

        struct Count(Arc<AtomicUsize>);
        impl Drop for Count {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        for _ in 0..2 {
            let guard = Count(Arc::clone(&dropped));
            pool.spawn(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            })
            .await
            .unwrap();
        }

        assert_eq!(pool.drain(Duration::from_secs(5)).await, 2);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
        assert!(pool.is_empty());
        assert_eq!(pool.busy(), 0);
    }
}
