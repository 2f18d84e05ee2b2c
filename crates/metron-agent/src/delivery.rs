//! The agent's two periodic loops.
//!
//! The sample loop runs the [`Sampler`] into the shared [`Snapshot`] on every
//! poll tick through a single-worker pool. The send loop drains the snapshot
//! on every report tick and hands the batch to the [`Transport`] through a
//! rate-limited pool, retrying transient failures. A batch that could not be
//! delivered is merged back into the snapshot for the next report.
//!
//! On shutdown each loop stops ticking, runs one last job to completion and
//! closes its pool. The send loop's last job starts only after the sample
//! loop has finished, so the final sample is part of the final report.

use crate::config::AgentConfig;
use crate::transport::Transport;
use anyhow::Context;
use metron_collector::Sampler;
use metron_common::retry::{retry_handle, Backoff, Failure};
use metron_common::snapshot::Snapshot;
use metron_common::workerpool::{PoolError, PoolStats, WorkerPool};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub send_workers: usize,
    /// Concurrent reports allowed; 0 means one per send worker.
    pub rate_limit: usize,
    pub backoff: Backoff,
}

impl From<&AgentConfig> for DeliverySettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            send_workers: config.send_workers,
            rate_limit: config.rate_limit,
            backoff: Backoff::default(),
        }
    }
}

/// Shortest tick accepted by [`drive`]; a zero period is raised to this.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Submits `make_job()` on every tick of `period` until `stop` fires, then
/// submits one more and waits for it to finish.
async fn drive<F, Fut>(
    pool: &WorkerPool,
    period: Duration,
    stop: &CancellationToken,
    mut make_job: F,
) -> Result<(), PoolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    submitted = pool.add_job(make_job()) => submitted?,
                }
            }
        }
    }

    let (done_tx, done_rx) = oneshot::channel();
    let last = make_job();
    pool.add_job(async move {
        let result = last.await;
        let _ = done_tx.send(());
        result
    })
    .await?;
    // An error here means the job panicked; the pool has logged it.
    let _ = done_rx.await;
    tracing::debug!(pool = pool.name(), "Final job finished");
    Ok(())
}

/// Drains `snapshot` and delivers it. On failure the batch is merged back.
async fn send_snapshot(
    transport: Arc<dyn Transport>,
    snapshot: Arc<Snapshot>,
    backoff: Backoff,
    abort: CancellationToken,
) -> anyhow::Result<()> {
    let batch = snapshot.drain();
    if batch.is_empty() {
        tracing::debug!("Nothing to report");
        return Ok(());
    }

    let samples = batch.to_samples();
    let transport = transport.as_ref();
    let payload = samples.as_slice();
    let sent = retry_handle(&backoff, &abort, || async move {
        transport.send(payload).await.map_err(|e| {
            if e.is_retryable() {
                Failure::Retryable(e)
            } else {
                Failure::Permanent(e)
            }
        })
    })
    .await;

    match sent {
        Ok(()) => {
            tracing::info!(count = samples.len(), "Metrics reported");
            Ok(())
        }
        Err(e) => {
            let count = samples.len();
            snapshot.merge_back(batch);
            Err(e).with_context(|| format!("Report of {count} metrics failed, kept for next report"))
        }
    }
}

pub struct DeliveryLoop {
    snapshot: Arc<Snapshot>,
    transport: Arc<dyn Transport>,
    settings: DeliverySettings,
}

impl DeliveryLoop {
    pub fn new(snapshot: Arc<Snapshot>, transport: Arc<dyn Transport>, settings: DeliverySettings) -> Self {
        Self {
            snapshot,
            transport,
            settings,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Runs both loops until `shutdown` fires and their final jobs are done.
    /// Retry waits in flight are cut short when `abort` fires.
    pub async fn run(
        &self,
        sampler: Sampler,
        shutdown: CancellationToken,
        abort: CancellationToken,
    ) -> anyhow::Result<()> {
        let sampling_done = CancellationToken::new();
        let sample = async {
            let stats = self.run_sample_loop(sampler, &shutdown).await;
            sampling_done.cancel();
            stats
        };
        let send = self.run_send_loop(&sampling_done, &abort);

        let (sampled, sent) = tokio::join!(sample, send);
        let sampled = sampled?;
        let sent = sent?;
        tracing::info!(
            samples = sampled.completed,
            reports = sent.completed,
            failed_reports = sent.failed,
            "Delivery stopped"
        );
        Ok(())
    }

    /// One worker, so sampling never runs concurrently with itself.
    pub async fn run_sample_loop(&self, sampler: Sampler, stop: &CancellationToken) -> Result<PoolStats, PoolError> {
        let mut pool = WorkerPool::new("sample", 1, 0);
        pool.run();

        let sampler = Arc::new(Mutex::new(sampler));
        let driven = drive(&pool, self.settings.poll_interval, stop, || {
            let sampler = sampler.clone();
            let snapshot = self.snapshot.clone();
            async move {
                let mut sampler = sampler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                sampler.sample_into(&snapshot);
                anyhow::Ok(())
            }
        })
        .await;

        let stats = pool.close().await;
        driven.map(|()| stats)
    }

    pub async fn run_send_loop(&self, stop: &CancellationToken, abort: &CancellationToken) -> Result<PoolStats, PoolError> {
        let rate_limit = match self.settings.rate_limit {
            0 => self.settings.send_workers,
            n => n,
        };
        let mut pool = WorkerPool::new("send", self.settings.send_workers, rate_limit);
        pool.run();

        let driven = drive(&pool, self.settings.report_interval, stop, || {
            send_snapshot(
                self.transport.clone(),
                self.snapshot.clone(),
                self.settings.backoff.clone(),
                abort.clone(),
            )
        })
        .await;

        let stats = pool.close().await;
        driven.map(|()| stats)
    }

    /// Drains and delivers the snapshot once, outside the send loop.
    pub async fn send_once(&self, abort: &CancellationToken) -> anyhow::Result<()> {
        send_snapshot(
            self.transport.clone(),
            self.snapshot.clone(),
            self.settings.backoff.clone(),
            abort.clone(),
        )
        .await
    }
}
