//! Background workers that claim pending tasks.

use std::sync::Arc;
use std::time::Duration;

use reelforge_db::pool::get_conn;
use reelforge_db::queries::tasks;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::Orchestrator;

/// `concurrency` workers, each running one task at a time.
pub struct WorkerPool {
    orchestrator: Orchestrator,
    wake: Arc<Notify>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        orchestrator: Orchestrator,
        wake: Arc<Notify>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            wake,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run every worker until `cancel` fires.
    ///
    /// Workers finish the task in hand first; the orchestrator's own
    /// shutdown token decides whether that task's encoder is killed.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Starting {} task worker(s)", self.concurrency);

        let mut workers = JoinSet::new();
        for index in 0..self.concurrency {
            workers.spawn(run_worker(
                index,
                self.orchestrator.clone(),
                self.wake.clone(),
                self.poll_interval,
                cancel.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Task worker exited abnormally: {}", e);
            }
        }

        tracing::info!("Task workers stopped");
    }
}

async fn run_worker(
    index: usize,
    orchestrator: Orchestrator,
    wake: Arc<Notify>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!("Worker {} started", index);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match process_next(&orchestrator).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => tracing::error!("Worker {}: {}", index, e),
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!("Worker {} stopped", index);
}

/// Claim and run one pending task. Returns `Ok(false)` when none is queued.
pub async fn process_next(orchestrator: &Orchestrator) -> reelforge_common::Result<bool> {
    let conn = get_conn(orchestrator.pool())?;
    let task = tasks::claim_next_pending(&conn)?;
    drop(conn);

    let Some(task) = task else {
        return Ok(false);
    };

    orchestrator.run(task).await;
    Ok(true)
}
