//! Orchestrator module for the search sync pipeline.
//!
//! Runs a pool of index sync workers over the shared queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{error, info, instrument};

use crate::errors::SyncError;
use crate::queue::IndexSyncQueue;
use crate::worker::{IndexSyncWorker, ProcessOutcome};

/// Interval between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Counters shared by every worker of a pool.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Total number of operations processed since startup.
    operations_processed: AtomicU64,
    /// Total number of documents written since startup.
    documents_indexed: AtomicU64,
    /// Total number of documents deleted since startup.
    documents_deleted: AtomicU64,
    superseded: AtomicU64,
    skipped: AtomicU64,
    /// Failed attempts, including ones that were retried.
    failures: AtomicU64,
    callback_failures: AtomicU64,
}

impl SyncStats {
    pub fn record(&self, outcome: &ProcessOutcome) {
        self.operations_processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProcessOutcome::Indexed { .. } => &self.documents_indexed,
            ProcessOutcome::Deleted { .. } => &self.documents_deleted,
            ProcessOutcome::Superseded => &self.superseded,
            ProcessOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.operations_processed.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failures(&self, count: u64) {
        self.callback_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn operations_processed(&self) -> u64 {
        self.operations_processed.load(Ordering::Relaxed)
    }

    pub fn documents_indexed(&self) -> u64 {
        self.documents_indexed.load(Ordering::Relaxed)
    }

    pub fn documents_deleted(&self) -> u64 {
        self.documents_deleted.load(Ordering::Relaxed)
    }

    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }
}

/// Pool of workers draining the index sync queue.
///
/// The pool:
/// - Spawns one task per worker, each leasing one operation at a time
/// - Handles shutdown signals (Ctrl-C or [`WorkerPool::shutdown`])
/// - Logs progress every 10 seconds
pub struct WorkerPool {
    worker: Arc<IndexSyncWorker>,
    queue: Arc<IndexSyncQueue>,
    workers: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    /// Create a pool running `workers` concurrent copies of `worker`.
    pub fn new(worker: IndexSyncWorker, queue: Arc<IndexSyncQueue>, workers: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            worker: Arc::new(worker),
            queue,
            workers: workers.max(1),
            shutdown_tx,
        }
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        self.worker.stats()
    }

    pub fn queue(&self) -> &Arc<IndexSyncQueue> {
        &self.queue
    }

    /// Run the pool.
    ///
    /// Blocks until a shutdown signal is received. Unsettled operations stay in the queue
    /// (and its journal) and are redelivered on the next start.
    #[instrument(skip(self), fields(workers = self.workers))]
    pub async fn run(&self) -> Result<(), SyncError> {
        info!("Starting index sync worker pool");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handles: Vec<_> = (0..self.workers)
            .map(|worker_id| {
                let worker = Arc::clone(&self.worker);
                let shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(async move { worker.run(worker_id, shutdown).await })
            })
            .collect();

        let stats = Arc::clone(self.worker.stats());
        let mut progress_timer = interval(PROGRESS_INTERVAL);
        progress_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Track previous values for rate calculation
        let mut prev_processed: u64 = 0;
        let mut prev_time = std::time::Instant::now();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown request");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = progress_timer.tick() => {
                    let processed = stats.operations_processed();
                    let now = std::time::Instant::now();
                    let elapsed_secs = now.duration_since(prev_time).as_secs_f64();

                    let ops_per_sec = if elapsed_secs > 0.0 {
                        (processed.saturating_sub(prev_processed) as f64) / elapsed_secs
                    } else {
                        0.0
                    };

                    let queue_stats = self.queue.stats();
                    info!(
                        operations_processed = processed,
                        documents_indexed = stats.documents_indexed(),
                        documents_deleted = stats.documents_deleted(),
                        superseded = stats.superseded(),
                        failures = stats.failures(),
                        callback_failures = stats.callback_failures(),
                        pending = queue_stats.pending,
                        in_flight = queue_stats.in_flight,
                        dead_lettered = queue_stats.failed,
                        operations_per_sec = format!("{:.2}", ops_per_sec),
                        "Processing progress"
                    );

                    prev_processed = processed;
                    prev_time = now;
                }
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        let queue_stats = self.queue.stats();
        info!(
            total_operations_processed = stats.operations_processed(),
            total_documents_indexed = stats.documents_indexed(),
            total_documents_deleted = stats.documents_deleted(),
            unsettled = queue_stats.pending + queue_stats.in_flight,
            "Worker pool shutdown complete"
        );
        Ok(())
    }

    /// Trigger a graceful shutdown. In-flight operations finish before workers stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_sync_repository::{DeleteOutcome, WriteResult};

    #[test]
    fn test_stats_record_outcomes() {
        let stats = SyncStats::default();

        stats.record(&ProcessOutcome::Indexed {
            document_id: "article_1".to_string(),
            result: WriteResult::Created,
            percolation: None,
        });
        stats.record(&ProcessOutcome::Deleted {
            document_id: "article_2".to_string(),
            outcome: DeleteOutcome::Deleted,
        });
        stats.record(&ProcessOutcome::Superseded);
        stats.record_failure();
        stats.record_callback_failures(2);

        assert_eq!(stats.operations_processed(), 4);
        assert_eq!(stats.documents_indexed(), 1);
        assert_eq!(stats.documents_deleted(), 1);
        assert_eq!(stats.superseded(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.callback_failures(), 2);
    }
}
