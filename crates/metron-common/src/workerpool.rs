//! A fixed set of async workers pulling jobs from a rendezvous queue.
//!
//! [`WorkerPool::add_job`] waits until a worker accepts the job, so callers
//! are back-pressured when every worker is busy. With a non-zero rate limit
//! a worker must hold one of `rate_limit` semaphore permits before accepting
//! a job, capping how many jobs execute at once independently of the number
//! of workers.
//!
//! A failing or panicking job is logged and counted; the worker that ran it
//! keeps consuming.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A unit of work: a future resolving to success or failure.
pub type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool '{0}' is not running")]
    NotRunning(String),

    #[error("worker pool '{0}' is closed")]
    Closed(String),
}

/// Job outcomes accumulated over the pool's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl std::ops::AddAssign for PoolStats {
    fn add_assign(&mut self, rhs: Self) {
        self.completed += rhs.completed;
        self.failed += rhs.failed;
        self.panicked += rhs.panicked;
    }
}

pub struct WorkerPool {
    name: String,
    worker_count: usize,
    rate_limit: usize,
    sender: kanal::AsyncSender<Job>,
    receiver: Option<kanal::AsyncReceiver<Job>>,
    workers: JoinSet<PoolStats>,
}

impl WorkerPool {
    /// `rate_limit == 0` means no cap beyond `worker_count`.
    pub fn new(name: impl Into<String>, worker_count: usize, rate_limit: usize) -> Self {
        let (sender, receiver) = kanal::bounded_async(0);
        Self {
            name: name.into(),
            worker_count: worker_count.max(1),
            rate_limit,
            sender,
            receiver: Some(receiver),
            workers: JoinSet::new(),
        }
    }

    /// Spawns the workers. Calling it again is a no-op.
    pub fn run(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        let permits = (self.rate_limit > 0).then(|| Arc::new(Semaphore::new(self.rate_limit)));

        for worker_id in 0..self.worker_count {
            self.workers.spawn(worker_loop(
                self.name.clone(),
                worker_id,
                receiver.clone(),
                permits.clone(),
            ));
        }
        tracing::debug!(
            pool = %self.name,
            workers = self.worker_count,
            rate_limit = self.rate_limit,
            "Worker pool started"
        );
    }

    /// Hands `job` to a worker, waiting until one accepts it.
    pub async fn add_job<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.receiver.is_some() {
            return Err(PoolError::NotRunning(self.name.clone()));
        }
        self.sender
            .send(Box::pin(job))
            .await
            .map_err(|_| PoolError::Closed(self.name.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closes the queue and waits for every worker to finish its current job.
    pub async fn close(self) -> PoolStats {
        let Self {
            name,
            sender,
            mut workers,
            ..
        } = self;
        drop(sender);

        let mut stats = PoolStats::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_stats) => stats += worker_stats,
                Err(e) => tracing::error!(pool = %name, error = %e, "Worker task aborted"),
            }
        }
        tracing::debug!(
            pool = %name,
            completed = stats.completed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Worker pool closed"
        );
        stats
    }
}

async fn worker_loop(
    pool: String,
    worker_id: usize,
    receiver: kanal::AsyncReceiver<Job>,
    permits: Option<Arc<Semaphore>>,
) -> PoolStats {
    let mut stats = PoolStats::default();
    loop {
        // Held until the job finishes, so at most `rate_limit` workers are
        // waiting for or running a job.
        let _permit = match &permits {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        let Ok(job) = receiver.recv().await else {
            break;
        };

        match tokio::spawn(job).await {
            Ok(Ok(())) => stats.completed += 1,
            Ok(Err(e)) => {
                stats.failed += 1;
                tracing::warn!(pool = %pool, worker = worker_id, error = %e, "Job failed");
            }
            Err(e) => {
                stats.panicked += 1;
                tracing::error!(pool = %pool, worker = worker_id, error = %e, "Job panicked");
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_every_submitted_job() {
        let mut pool = WorkerPool::new("test", 3, 0);
        pool.run();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = done.clone();
            pool.add_job(async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        let stats = pool.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(stats.completed, 20);
    }

    #[tokio::test]
    async fn rate_limit_caps_concurrent_jobs() {
        let mut pool = WorkerPool::new("limited", 5, 2);
        pool.run();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let running = running.clone();
            let peak = peak.clone();
            pool.add_job(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        let stats = pool.close().await;
        assert_eq!(stats.completed, 12);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_job_does_not_stop_the_worker() {
        let mut pool = WorkerPool::new("single", 1, 0);
        pool.run();
        pool.add_job(async { Err(anyhow::anyhow!("boom")) }).await.unwrap();
        pool.add_job(async {
            if true {
                panic!("job panic");
            }
            Ok(())
        })
        .await
        .unwrap();
        pool.add_job(async { Ok(()) }).await.unwrap();

        let stats = pool.close().await;
        assert_eq!(
            stats,
            PoolStats {
                completed: 1,
                failed: 1,
                panicked: 1
            }
        );
    }

    #[tokio::test]
    async fn add_job_before_run_is_rejected() {
        let pool = WorkerPool::new("idle", 1, 0);
        let err = pool.add_job(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, PoolError::NotRunning(ref name) if name == "idle"));
    }
}
