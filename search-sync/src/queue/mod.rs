//! Index sync queue.
//!
//! A partitioned, at-least-once delivery queue of index operations:
//!
//! - Operations are partitioned by `(entity_type, entity_id)`. Only the head of a
//!   partition is deliverable and nothing else in the partition is delivered while the
//!   head is leased, so every entity's history is applied in commit order.
//! - A dequeued operation is leased for the visibility timeout. If it is neither acked
//!   nor nacked in time it becomes deliverable again. Every delivery carries its own
//!   lease (the `attempt_count` it was delivered with) and only the current lease
//!   holder can settle it, so a worker that outlived its lease cannot release the
//!   partition while another worker holds the operation.
//! - Enqueuing a delete supersedes the earlier operations of its partition: pending ones
//!   are settled without ever reaching the engine, a leased one is flagged so the worker
//!   can discard its write.
//! - Failures are settled here. A retryable nack is redelivered after an exponential
//!   backoff; a terminal nack or an exhausted operation is marked failed and written to
//!   the dead-letter sink exactly once.

mod journal;

pub use journal::FileJournal;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use search_sync_shared::{
    AttemptFailure, ChangeKind, IndexOperation, OperationStatus, PartitionKey,
};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::dead_letter::DeadLetterSink;
use crate::errors::SyncError;

/// Point-in-time counters of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: u64,
    pub failed: u64,
    /// Operations discarded because a later delete for the same entity was enqueued.
    pub superseded: u64,
}

struct Entry {
    op: IndexOperation,
    not_before: Option<Instant>,
    lease_until: Option<Instant>,
    failures: Vec<AttemptFailure>,
    superseded: bool,
}

impl Entry {
    fn new(op: IndexOperation) -> Self {
        Self {
            op,
            not_before: None,
            lease_until: None,
            failures: Vec::new(),
            superseded: false,
        }
    }
}

type DeadLetter = (IndexOperation, Vec<AttemptFailure>);

enum Poll {
    Delivered(IndexOperation),
    Wait(Option<Instant>),
    Closed,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<Uuid, Entry>,
    partitions: HashMap<PartitionKey, VecDeque<Uuid>>,
    /// Partitions that may have a deliverable head. Validated when popped.
    ready: VecDeque<PartitionKey>,
    in_flight: HashSet<Uuid>,
    next_sequence: u64,
    closed: bool,
    journal: Option<FileJournal>,
    succeeded: u64,
    failed: u64,
    superseded: u64,
}

impl QueueState {
    fn insert(&mut self, op: IndexOperation) {
        let key = op.partition_key();
        self.partitions
            .entry(key.clone())
            .or_default()
            .push_back(op.operation_id);
        self.entries.insert(op.operation_id, Entry::new(op));
        self.ready.push_back(key);
    }

    /// Number of pending operations of `key` a delete would settle.
    fn supersedable(&self, key: &PartitionKey) -> usize {
        self.partitions.get(key).map_or(0, |queued| {
            queued
                .iter()
                .filter(|id| !self.in_flight.contains(id))
                .count()
        })
    }

    /// Settle every operation of `key` ahead of a new delete.
    fn supersede(&mut self, key: &PartitionKey) {
        let Some(queued) = self.partitions.get(key).cloned() else {
            return;
        };

        for id in queued {
            if self.in_flight.contains(&id) {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.superseded = true;
                    debug!(operation_id = %id, partition = %key, "In-flight operation superseded by delete");
                }
                continue;
            }
            if self.settle(id, OperationStatus::Succeeded).is_some() {
                self.superseded += 1;
                debug!(operation_id = %id, partition = %key, "Pending operation superseded by delete");
            }
        }
    }

    /// Move an operation to a terminal status and drop it from the queue.
    fn settle(&mut self, id: Uuid, status: OperationStatus) -> Option<Entry> {
        let mut entry = self.entries.remove(&id)?;
        self.in_flight.remove(&id);

        if let Err(e) = entry.op.transition(status) {
            warn!(operation_id = %id, error = %e, "Unexpected status transition while settling");
            entry.op.status = status;
        }

        let key = entry.op.partition_key();
        if let Some(queued) = self.partitions.get_mut(&key) {
            queued.retain(|queued_id| *queued_id != id);
            if queued.is_empty() {
                self.partitions.remove(&key);
            } else {
                self.ready.push_back(key);
            }
        }

        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.append_settled(id, status) {
                warn!(operation_id = %id, error = %e, "Failed to journal settlement; operation will be replayed on restart");
            }
        }

        Some(entry)
    }

    /// Whether `lease` is the current lease of the in-flight operation `id`.
    fn holds_lease(&self, id: Uuid, lease: u32) -> bool {
        self.in_flight.contains(&id)
            && self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.op.attempt_count == lease)
    }

    /// Record a failed delivery and decide between redelivery and dead-lettering.
    fn fail(
        &mut self,
        id: Uuid,
        lease: u32,
        error: &SyncError,
        now: Instant,
        config: &QueueConfig,
    ) -> Result<Option<DeadLetter>, SyncError> {
        if !self.holds_lease(id, lease) {
            return Err(SyncError::UnknownOperation(id));
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(SyncError::UnknownOperation(id));
        };

        let attempt = entry.op.attempt_count;
        entry.failures.push(AttemptFailure::new(
            attempt,
            error.to_string(),
            error.is_retryable(),
        ));

        if entry.superseded {
            self.settle(id, OperationStatus::Succeeded);
            self.superseded += 1;
            return Ok(None);
        }

        if error.is_retryable() && config.retry.allows_retry(attempt) {
            let delay = config.retry.backoff(attempt);
            if let Err(e) = entry.op.transition(OperationStatus::Pending) {
                warn!(operation_id = %id, error = %e, "Unexpected status transition on retry");
            }
            entry.lease_until = None;
            entry.not_before = Some(now + delay);
            let key = entry.op.partition_key();
            self.in_flight.remove(&id);
            self.ready.push_back(key);

            debug!(
                operation_id = %id,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Operation requeued for retry"
            );
            return Ok(None);
        }

        let entry = self
            .settle(id, OperationStatus::Failed)
            .ok_or(SyncError::UnknownOperation(id))?;
        self.failed += 1;
        Ok(Some((entry.op, entry.failures)))
    }

    /// Reclaim leases that ran past the visibility timeout.
    fn expire_leases(&mut self, now: Instant, config: &QueueConfig) -> Vec<DeadLetter> {
        let expired: Vec<(Uuid, u32)> = self
            .in_flight
            .iter()
            .filter_map(|id| {
                let entry = self.entries.get(id)?;
                entry
                    .lease_until
                    .is_some_and(|until| until <= now)
                    .then_some((*id, entry.op.attempt_count))
            })
            .collect();

        let timeout = SyncError::transient(format!(
            "Visibility timeout of {}ms expired",
            config.visibility_timeout.as_millis()
        ));

        let mut dead = Vec::new();
        for (id, lease) in expired {
            warn!(operation_id = %id, lease, "Lease expired, operation will be redelivered");
            if let Ok(Some(dead_letter)) = self.fail(id, lease, &timeout, now, config) {
                dead.push(dead_letter);
            }
        }
        dead
    }

    fn poll(&mut self, now: Instant, config: &QueueConfig) -> Poll {
        if self.closed {
            return Poll::Closed;
        }

        let mut earliest: Option<Instant> = None;
        for _ in 0..self.ready.len() {
            let Some(key) = self.ready.pop_front() else {
                break;
            };
            let Some(&head) = self.partitions.get(&key).and_then(|queued| queued.front()) else {
                continue;
            };
            if self.in_flight.contains(&head) {
                continue;
            }
            let Some(entry) = self.entries.get_mut(&head) else {
                continue;
            };

            if let Some(not_before) = entry.not_before.filter(|at| *at > now) {
                earliest = Some(earliest.map_or(not_before, |e| e.min(not_before)));
                self.ready.push_back(key);
                continue;
            }

            if let Err(e) = entry.op.transition(OperationStatus::InFlight) {
                warn!(operation_id = %head, error = %e, "Skipping undeliverable operation");
                continue;
            }
            entry.not_before = None;
            entry.lease_until = Some(now + config.visibility_timeout);
            self.in_flight.insert(head);
            return Poll::Delivered(entry.op.clone());
        }

        let next_expiry = self
            .in_flight
            .iter()
            .filter_map(|id| self.entries.get(id).and_then(|entry| entry.lease_until))
            .min();

        Poll::Wait(match (earliest, next_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }
}

/// Durable, ordered, at-least-once queue of index operations.
pub struct IndexSyncQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    dead_letter: Arc<dyn DeadLetterSink>,
}

impl IndexSyncQueue {
    /// Create an in-memory queue.
    pub fn new(config: QueueConfig, dead_letter: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dead_letter,
        }
    }

    /// Create a queue backed by the journal at `path`, restoring unsettled operations.
    ///
    /// Restored operations are pending again. Operations that were leased when the
    /// process stopped are redelivered.
    pub fn with_journal(
        config: QueueConfig,
        dead_letter: Arc<dyn DeadLetterSink>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SyncError> {
        let (journal, restored) = FileJournal::open(path)?;

        let mut state = QueueState {
            journal: Some(journal),
            ..QueueState::default()
        };
        let restored_count = restored.len();
        for mut op in restored {
            op.status = OperationStatus::Pending;
            state.next_sequence = state.next_sequence.max(op.sequence);
            state.insert(op);
        }

        if restored_count > 0 {
            info!(restored = restored_count, "Restored unsettled operations from journal");
        }

        Ok(Self {
            config,
            state: Mutex::new(state),
            notify: Notify::new(),
            dead_letter,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an operation. Never waits on the search engine.
    ///
    /// # Errors
    ///
    /// * [`SyncError::QueueSaturated`] when the queue holds `capacity` unsettled operations.
    ///   The pending operations a delete supersedes do not count against it.
    /// * [`SyncError::QueueClosed`] after [`IndexSyncQueue::close`]
    /// * [`SyncError::Journal`] when the operation could not be made durable
    pub fn enqueue(&self, mut op: IndexOperation) -> Result<Uuid, SyncError> {
        let mut state = self.lock();

        if state.closed {
            return Err(SyncError::QueueClosed);
        }
        // a delete frees the pending slots of its partition
        let reclaimable = match op.change_kind {
            ChangeKind::Delete => state.supersedable(&op.partition_key()),
            ChangeKind::Create | ChangeKind::Update => 0,
        };
        if state.entries.len() - reclaimable >= self.config.capacity {
            return Err(SyncError::QueueSaturated {
                capacity: self.config.capacity,
            });
        }

        op.sequence = state.next_sequence + 1;
        op.status = OperationStatus::Pending;
        op.attempt_count = 0;

        if let Some(journal) = state.journal.as_mut() {
            journal.append_enqueued(&op)?;
        }
        state.next_sequence = op.sequence;

        let id = op.operation_id;
        if op.change_kind == ChangeKind::Delete {
            state.supersede(&op.partition_key());
        }

        debug!(
            operation_id = %id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            change_kind = %op.change_kind,
            sequence = op.sequence,
            "Operation enqueued"
        );
        state.insert(op);
        drop(state);

        self.notify.notify_waiters();
        Ok(id)
    }

    /// Lease the next deliverable operation without waiting.
    pub async fn try_dequeue(&self) -> Option<IndexOperation> {
        let now = Instant::now();
        let (poll, dead) = {
            let mut state = self.lock();
            let dead = state.expire_leases(now, &self.config);
            (state.poll(now, &self.config), dead)
        };
        self.record_dead_letters(dead).await;

        match poll {
            Poll::Delivered(op) => Some(op),
            Poll::Wait(_) | Poll::Closed => None,
        }
    }

    /// Lease the next deliverable operation, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<IndexOperation> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let (poll, dead) = {
                let mut state = self.lock();
                let dead = state.expire_leases(now, &self.config);
                (state.poll(now, &self.config), dead)
            };
            self.record_dead_letters(dead).await;

            match poll {
                Poll::Delivered(op) => return Some(op),
                Poll::Closed => return None,
                Poll::Wait(Some(deadline)) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
                Poll::Wait(None) => notified.as_mut().await,
            }
        }
    }

    /// Settle a leased operation as succeeded.
    ///
    /// `lease` is the `attempt_count` the operation was delivered with. An ack for a
    /// lease that expired is rejected with [`SyncError::UnknownOperation`].
    pub fn ack(&self, operation_id: Uuid, lease: u32) -> Result<(), SyncError> {
        let mut state = self.lock();
        if !state.holds_lease(operation_id, lease) {
            return Err(SyncError::UnknownOperation(operation_id));
        }

        state.settle(operation_id, OperationStatus::Succeeded);
        state.succeeded += 1;
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Report a failed delivery of a leased operation.
    ///
    /// Retryable errors requeue the operation with backoff until `max_attempts` is
    /// reached. Terminal errors and exhausted operations are marked failed and
    /// dead-lettered. As with [`IndexSyncQueue::ack`], only the current lease holder
    /// can nack.
    pub async fn nack(
        &self,
        operation_id: Uuid,
        lease: u32,
        reason: &SyncError,
    ) -> Result<(), SyncError> {
        let dead = {
            let mut state = self.lock();
            state.fail(operation_id, lease, reason, Instant::now(), &self.config)?
        };
        self.notify.notify_waiters();

        if let Some(dead_letter) = dead {
            self.record_dead_letters(vec![dead_letter]).await;
        }
        Ok(())
    }

    /// Time left on `lease` of `operation_id`, or `None` once it is no longer live.
    pub fn lease_remaining(&self, operation_id: Uuid, lease: u32) -> Option<Duration> {
        let now = Instant::now();
        let state = self.lock();
        if !state.holds_lease(operation_id, lease) {
            return None;
        }
        state
            .entries
            .get(&operation_id)
            .and_then(|entry| entry.lease_until)
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Whether a later delete made this operation obsolete.
    pub fn is_superseded(&self, operation_id: Uuid) -> bool {
        self.lock()
            .entries
            .get(&operation_id)
            .is_some_and(|entry| entry.superseded)
    }

    /// Stop accepting and delivering operations. Unsettled operations stay journaled.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        info!("Index sync queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of unsettled operations.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.entries.len() - state.in_flight.len(),
            in_flight: state.in_flight.len(),
            succeeded: state.succeeded,
            failed: state.failed,
            superseded: state.superseded,
        }
    }

    async fn record_dead_letters(&self, dead: Vec<DeadLetter>) {
        for (op, failures) in dead {
            let last_error = failures
                .last()
                .map(|failure| failure.error.clone())
                .unwrap_or_default();

            error!(
                alert = true,
                operation_id = %op.operation_id,
                entity_type = %op.entity_type,
                entity_id = %op.entity_id,
                change_kind = %op.change_kind,
                attempts = op.attempt_count,
                error = %last_error,
                "Operation failed permanently and was dead-lettered"
            );

            if let Err(e) = self.dead_letter.record(&op, &failures).await {
                error!(
                    alert = true,
                    operation_id = %op.operation_id,
                    error = %e,
                    "Failed to write dead-letter record"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::dead_letter::MemoryDeadLetterSink;
    use search_sync_shared::EntityRecord;
    use serde_json::json;

    fn config(capacity: usize, max_attempts: u32) -> QueueConfig {
        QueueConfig {
            capacity,
            visibility_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
                jitter: false,
            },
        }
    }

    fn queue(capacity: usize, max_attempts: u32) -> (IndexSyncQueue, Arc<MemoryDeadLetterSink>) {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        (
            IndexSyncQueue::new(config(capacity, max_attempts), sink.clone()),
            sink,
        )
    }

    fn upsert(id: &str, kind: ChangeKind, title: &str) -> IndexOperation {
        IndexOperation::upsert(
            EntityRecord::new("article", id).with_attribute("title", json!(title)),
            kind,
        )
    }

    #[tokio::test]
    async fn test_partition_delivers_in_order() {
        let (queue, _) = queue(10, 3);
        let create = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        let update = queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();

        let first = queue.try_dequeue().await.unwrap();
        assert_eq!(first.operation_id, create);
        assert_eq!(first.status, OperationStatus::InFlight);
        assert_eq!(first.attempt_count, 1);

        // the update waits for the create to settle
        assert!(queue.try_dequeue().await.is_none());

        queue.ack(create, first.attempt_count).unwrap();
        let second = queue.try_dequeue().await.unwrap();
        assert_eq!(second.operation_id, update);
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn test_distinct_entities_are_independent() {
        let (queue, _) = queue(10, 3);
        queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("2", ChangeKind::Create, "b")).unwrap();

        let a = queue.try_dequeue().await.unwrap();
        let b = queue.try_dequeue().await.unwrap();
        assert_ne!(a.entity_id, b.entity_id);
        assert_eq!(queue.stats().in_flight, 2);
    }

    #[tokio::test]
    async fn test_enqueue_saturated() {
        let (queue, _) = queue(2, 3);
        queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("2", ChangeKind::Create, "b")).unwrap();

        let err = queue
            .enqueue(upsert("3", ChangeKind::Create, "c"))
            .unwrap_err();
        assert!(matches!(err, SyncError::QueueSaturated { capacity: 2 }));
    }

    #[tokio::test]
    async fn test_delete_supersedes_pending() {
        let (queue, _) = queue(10, 3);
        queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();
        let delete = queue.enqueue(IndexOperation::delete("article", "1")).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.superseded, 2);
        assert_eq!(stats.pending, 1);

        let next = queue.try_dequeue().await.unwrap();
        assert_eq!(next.operation_id, delete);
        assert_eq!(next.change_kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_delete_flags_in_flight_operation() {
        let (queue, _) = queue(10, 3);
        let create = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        let leased = queue.try_dequeue().await.unwrap();

        let delete = queue.enqueue(IndexOperation::delete("article", "1")).unwrap();
        assert!(queue.is_superseded(create));
        assert!(!queue.is_superseded(delete));

        // nacking a superseded operation settles it instead of retrying
        queue
            .nack(create, leased.attempt_count, &SyncError::transient("engine unavailable"))
            .await
            .unwrap();
        assert_eq!(queue.try_dequeue().await.unwrap().operation_id, delete);
        assert_eq!(queue.stats().superseded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_nack_backs_off() {
        let (queue, sink) = queue(10, 3);
        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();

        queue.try_dequeue().await.unwrap();
        queue
            .nack(id, 1, &SyncError::transient("503"))
            .await
            .unwrap();

        // first backoff is 100ms
        assert!(queue.try_dequeue().await.is_none());
        tokio::time::advance(Duration::from_millis(100)).await;

        let redelivered = queue.try_dequeue().await.unwrap();
        assert_eq!(redelivered.operation_id, id);
        assert_eq!(redelivered.attempt_count, 2);
        assert!(sink.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_operation_is_dead_lettered_once() {
        let (queue, sink) = queue(10, 3);
        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();

        for _ in 0..3 {
            let op = queue.dequeue().await.unwrap();
            queue
                .nack(op.operation_id, op.attempt_count, &SyncError::transient("timeout"))
                .await
                .unwrap();
        }

        assert!(queue.try_dequeue().await.is_none());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation.operation_id, id);
        assert_eq!(records[0].operation.status, OperationStatus::Failed);
        assert_eq!(records[0].failure_history.len(), 3);
        assert_eq!(queue.stats().failed, 1);

        // the settled operation cannot be nacked again
        let err = queue
            .nack(id, 3, &SyncError::transient("timeout"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownOperation(_)));
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_nack_fails_immediately() {
        let (queue, sink) = queue(10, 5);
        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();

        queue.try_dequeue().await.unwrap();
        queue
            .nack(id, 1, &SyncError::terminal("mapping conflict"))
            .await
            .unwrap();

        assert_eq!(sink.records().len(), 1);
        assert!(!sink.records()[0].failure_history[0].retryable);

        // the partition moves on
        let next = queue.try_dequeue().await.unwrap();
        assert_eq!(next.change_kind, ChangeKind::Update);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered() {
        let (queue, _) = queue(10, 3);
        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();

        queue.try_dequeue().await.unwrap();
        assert!(queue.try_dequeue().await.is_none());

        // lease (5s) plus first backoff (100ms)
        let redelivered = tokio::time::timeout(Duration::from_secs(10), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.operation_id, id);
        assert_eq!(redelivered.attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_lease_cannot_settle() {
        let (queue, _) = queue(10, 3);
        let create = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();

        let first_delivery = queue.dequeue().await.unwrap();
        assert_eq!(first_delivery.operation_id, create);

        // the first holder stalls past the visibility timeout and the create is re-leased
        let second_delivery = tokio::time::timeout(Duration::from_secs(10), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second_delivery.operation_id, create);
        assert_eq!(second_delivery.attempt_count, 2);
        assert!(queue
            .lease_remaining(create, first_delivery.attempt_count)
            .is_none());
        assert_eq!(
            queue.lease_remaining(create, second_delivery.attempt_count),
            Some(Duration::from_secs(5))
        );

        assert!(matches!(
            queue.ack(create, first_delivery.attempt_count),
            Err(SyncError::UnknownOperation(_))
        ));
        assert!(matches!(
            queue
                .nack(
                    create,
                    first_delivery.attempt_count,
                    &SyncError::transient("late failure")
                )
                .await,
            Err(SyncError::UnknownOperation(_))
        ));

        // the partition stays blocked behind the current holder
        assert!(queue.try_dequeue().await.is_none());
        assert_eq!(queue.stats().in_flight, 1);

        queue.ack(create, second_delivery.attempt_count).unwrap();
        let update = queue.try_dequeue().await.unwrap();
        assert_eq!(update.change_kind, ChangeKind::Update);
        assert_eq!(queue.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_delete_at_capacity_reclaims_pending_slots() {
        let (queue, _) = queue(2, 3);
        queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();

        let delete = queue.enqueue(IndexOperation::delete("article", "1")).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().superseded, 2);
        assert_eq!(queue.try_dequeue().await.unwrap().operation_id, delete);
    }

    #[tokio::test]
    async fn test_delete_at_capacity_without_pending_is_saturated() {
        let (queue, _) = queue(2, 3);
        queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        queue.enqueue(upsert("2", ChangeKind::Create, "b")).unwrap();
        let leased = queue.try_dequeue().await.unwrap();

        // an in-flight operation keeps its slot until it settles
        let err = queue
            .enqueue(IndexOperation::delete("article", &leased.entity_id))
            .unwrap_err();
        assert!(matches!(err, SyncError::QueueSaturated { capacity: 2 }));

        let err = queue
            .enqueue(IndexOperation::delete("article", "3"))
            .unwrap_err();
        assert!(matches!(err, SyncError::QueueSaturated { capacity: 2 }));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let (queue, _) = queue(10, 3);
        let queue = Arc::new(queue);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;

        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivered.operation_id, id);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let (queue, _) = queue(10, 3);
        let queue = Arc::new(queue);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;

        queue.close();
        let delivered = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(delivered.is_none());
        assert!(matches!(
            queue.enqueue(upsert("1", ChangeKind::Create, "a")),
            Err(SyncError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_ack_unknown_operation() {
        let (queue, _) = queue(10, 3);
        let id = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();

        // pending but not leased
        assert!(matches!(
            queue.ack(id, 1),
            Err(SyncError::UnknownOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_journal_restores_unsettled_operations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let sink = Arc::new(MemoryDeadLetterSink::new());

        let (create, update) = {
            let queue =
                IndexSyncQueue::with_journal(config(10, 3), sink.clone(), &path).unwrap();
            let create = queue.enqueue(upsert("1", ChangeKind::Create, "a")).unwrap();
            let update = queue.enqueue(upsert("1", ChangeKind::Update, "b")).unwrap();
            queue.enqueue(upsert("2", ChangeKind::Create, "c")).unwrap();
            queue.enqueue(IndexOperation::delete("article", "2")).unwrap();

            let op = queue.try_dequeue().await.unwrap();
            assert_eq!(op.operation_id, create);
            (create, update)
        };

        // the create was leased but never acked
        let queue = IndexSyncQueue::with_journal(config(10, 3), sink, &path).unwrap();
        assert_eq!(queue.len(), 3);

        let first = queue.try_dequeue().await.unwrap();
        let second = queue.try_dequeue().await.unwrap();
        let delivered: HashSet<Uuid> = [first.operation_id, second.operation_id].into();
        assert!(delivered.contains(&create));
        assert!(!delivered.contains(&update));

        let leased = if first.operation_id == create { &first } else { &second };
        queue.ack(create, leased.attempt_count).unwrap();
        let third = queue.try_dequeue().await.unwrap();
        assert_eq!(third.operation_id, update);

        let next_id = queue.enqueue(upsert("3", ChangeKind::Create, "d")).unwrap();
        assert_ne!(next_id, update);
    }
}
