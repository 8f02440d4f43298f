//! Bounded pool that runs claimed jobs.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Executes submitted job tasks with bounded concurrency.
pub trait WorkerPool: Send + Sync {
    /// Start a task. Returns `false`, without running it, when the pool is
    /// full.
    fn submit(&self, task: BoxFuture<'static, ()>) -> bool;

    /// Number of tasks that can be accepted right now.
    fn remaining_capacity(&self) -> usize;
}

/// [`WorkerPool`] that spawns tokio tasks, one semaphore permit each.
#[derive(Debug, Clone)]
pub struct SemaphoreWorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl SemaphoreWorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl WorkerPool for SemaphoreWorkerPool {
    fn submit(&self, task: BoxFuture<'static, ()>) -> bool {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    // Keep permit until done
                    let _permit = permit;
                    task.await;
                });
                true
            }
            Err(_) => false,
        }
    }

    fn remaining_capacity(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_rejects_when_full() {
        let pool = SemaphoreWorkerPool::new(1);
        let (release, wait) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        assert!(pool.submit(Box::pin(async move {
            let _ = wait.await;
            let _ = done_tx.send(());
        })));
        assert_eq!(pool.remaining_capacity(), 0);
        assert!(!pool.submit(Box::pin(async {})));

        release.send(()).unwrap();
        done_rx.await.unwrap();
        // The permit is released when the spawned task finishes.
        for _ in 0..100 {
            if pool.remaining_capacity() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.remaining_capacity(), 1);
    }
}
