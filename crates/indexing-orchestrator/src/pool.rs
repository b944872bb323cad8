//! Bounded pool for CPU-bound solves.
//!
//! Work runs on tokio's blocking threads; a semaphore caps how many run at
//! once so a burst of requests queues here instead of starving the runtime.

use index_core::{IndexingError, IndexingResult};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct SolvePool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl SolvePool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits not currently held by a running job
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `job` on a blocking thread once a permit is free.
    ///
    /// Dropping the returned future abandons the wait; a job that already
    /// started runs to completion and its result is discarded.
    pub async fn run<T, F>(&self, label: &'static str, job: F) -> IndexingResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> IndexingResult<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| IndexingError::invariant_violation(format!("{} pool closed: {}", label, e)))?;

        tracing::debug!("{} started ({} permits left)", label, self.semaphore.available_permits());
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| IndexingError::invariant_violation(format!("{} worker failed: {}", label, e)))?
    }
}

impl Default for SolvePool {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_job_and_returns_value() {
        let pool = SolvePool::new(2);
        let value = pool.run("sum", || Ok((1..=10).sum::<i32>())).await.unwrap();
        assert_eq!(value, 55);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_job_error_passes_through() {
        let pool = SolvePool::new(1);
        let err = pool
            .run::<(), _>("fail", || Err(IndexingError::InsufficientData("T < 2".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = SolvePool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run("sleep", move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let pool = SolvePool::new(1);
        let err = pool
            .run::<(), _>("panic", || panic!("boom"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "solver_divergence");
        // The permit is released even though the job panicked.
        assert_eq!(pool.available(), 1);
    }
}
