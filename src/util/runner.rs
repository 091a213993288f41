//! Bounded fan-out for adapter-side listing work

use crate::error::{ReplicationError, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag handed to submitted tasks
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs submitted futures with at most `max` in flight.
///
/// Results come back in submission order. The first failure cancels the
/// runner: tasks that have not started yet are skipped, running tasks can
/// observe [`CancelHandle::is_cancelled`], and `wait` drops whatever is still
/// in flight before returning the error.
pub struct LimitedConcurrentRunner<'a, T> {
    max: usize,
    handle: CancelHandle,
    tasks: Vec<BoxFuture<'a, Result<T>>>,
}

impl<'a, T: Send + 'a> LimitedConcurrentRunner<'a, T> {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            handle: CancelHandle::default(),
            tasks: Vec::new(),
        }
    }

    pub fn add_task<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'a,
    {
        let handle = self.handle.clone();
        self.tasks.push(
            async move {
                if handle.is_cancelled() {
                    return Err(ReplicationError::Cancelled);
                }
                task.await
            }
            .boxed(),
        );
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Drives every task to completion and returns their results in order
    pub async fn wait(self) -> Result<Vec<T>> {
        let handle = self.handle;
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut stream = stream::iter(self.tasks).buffered(self.max);
        while let Some(result) = stream.next().await {
            match result {
                Ok(value) => results.push(value),
                Err(e) => {
                    handle.cancel();
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let mut runner = LimitedConcurrentRunner::new(3);
        for i in 0..10u64 {
            runner.add_task(async move {
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                Ok(i)
            });
        }
        assert_eq!(runner.wait().await.unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut runner = LimitedConcurrentRunner::new(2);
        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            runner.add_task(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        runner.wait().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_error_cancels() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut runner = LimitedConcurrentRunner::new(1);
        let handle = runner.cancel_handle();
        runner.add_task(async { Err::<(), _>(ReplicationError::NotFound("repo".into())) });
        for _ in 0..3 {
            let started = started.clone();
            runner.add_task(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(runner.wait().await.unwrap_err().is_not_found());
        assert!(handle.is_cancelled());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_skips_pending_tasks() {
        let mut runner = LimitedConcurrentRunner::new(4);
        runner.add_task(async { Ok(1) });
        runner.cancel();
        assert!(runner.is_cancelled());
        assert!(runner.wait().await.unwrap_err().is_cancelled());
    }
}
