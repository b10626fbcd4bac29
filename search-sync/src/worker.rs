//! Index sync worker.
//!
//! A worker leases one operation at a time from the queue, applies it to the search
//! engine and fires the registered callbacks. Every engine call is bounded by the request
//! timeout; failures are classified and handed back to the queue, which decides between
//! redelivery and dead-lettering.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use search_sync_repository::{
    DeleteOutcome, SearchEngineClient, SearchIndexError, WriteResult,
};
use search_sync_shared::{ChangeKind, Document, EntityRecord, IndexOperation, PercolationMatch};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::callbacks::{CallbackDispatcher, IndexedEvent};
use crate::config::{EntityRegistry, EntityTypeConfig};
use crate::errors::SyncError;
use crate::mapper::{DocumentMapper, JsonDocumentMapper};
use crate::orchestrator::SyncStats;
use crate::queue::IndexSyncQueue;
use crate::throttle::DestinationThrottle;

/// Default bound on a single search engine call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads the current state of an entity from the system of record.
///
/// Without a resolver, the worker indexes the snapshot captured at commit time.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Return the entity, or `None` if it no longer exists.
    async fn resolve(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<EntityRecord>, SyncError>;
}

/// What a successfully processed operation did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The document was written.
    Indexed {
        document_id: String,
        result: WriteResult,
        percolation: Option<PercolationMatch>,
    },
    /// The document was removed, or was already absent.
    Deleted {
        document_id: String,
        outcome: DeleteOutcome,
    },
    /// A later delete made the operation obsolete; nothing was written.
    Superseded,
    /// The entity no longer exists in the system of record.
    Skipped,
}

/// Applies queued operations to the search engine.
pub struct IndexSyncWorker {
    queue: Arc<IndexSyncQueue>,
    client: Arc<dyn SearchEngineClient>,
    registry: Arc<EntityRegistry>,
    callbacks: Arc<CallbackDispatcher>,
    mapper: Arc<dyn DocumentMapper>,
    resolver: Option<Arc<dyn EntityResolver>>,
    throttle: Arc<DestinationThrottle>,
    request_timeout: Duration,
    stats: Arc<SyncStats>,
}

impl IndexSyncWorker {
    /// Create a worker using the default JSON mapper and the commit-time snapshots.
    pub fn new(
        queue: Arc<IndexSyncQueue>,
        client: Arc<dyn SearchEngineClient>,
        registry: Arc<EntityRegistry>,
        callbacks: Arc<CallbackDispatcher>,
    ) -> Self {
        let retry = &queue.config().retry;
        let throttle = Arc::new(DestinationThrottle::new(
            retry.initial_backoff,
            queue.config().max_throttle_pause(),
        ));

        Self {
            queue,
            client,
            registry,
            callbacks,
            mapper: Arc::new(JsonDocumentMapper),
            resolver: None,
            throttle,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stats: Arc::new(SyncStats::default()),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn DocumentMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Share a throttle with other workers.
    pub fn with_throttle(mut self, throttle: Arc<DestinationThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SyncStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    /// Apply one operation to the search engine and fire its callbacks.
    ///
    /// Does not ack or nack; see [`IndexSyncWorker::handle`].
    #[instrument(
        skip(self, op),
        fields(
            operation_id = %op.operation_id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            change_kind = %op.change_kind,
            attempt = op.attempt_count
        )
    )]
    pub async fn process_one(&self, op: &IndexOperation) -> Result<ProcessOutcome, SyncError> {
        let config = self
            .registry
            .get(&op.entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(op.entity_type.clone()))?;

        if self.queue.is_superseded(op.operation_id) {
            debug!("Operation superseded by a later delete, skipping");
            return Ok(ProcessOutcome::Superseded);
        }

        match op.change_kind {
            ChangeKind::Delete => self.apply_delete(op, config).await,
            ChangeKind::Create | ChangeKind::Update => self.apply_write(op, config).await,
        }
    }

    async fn apply_delete(
        &self,
        op: &IndexOperation,
        config: &EntityTypeConfig,
    ) -> Result<ProcessOutcome, SyncError> {
        let index_name = config.index_name();
        let document_id = Document::document_id(&config.document_type, &op.entity_id);

        let outcome = self
            .call(
                op,
                index_name,
                self.client
                    .delete(index_name, &config.document_type, &document_id),
            )
            .await?;

        debug!(index = %index_name, doc_id = %document_id, outcome = ?outcome, "Document deleted");

        self.callbacks.dispatch_indexed(&IndexedEvent {
            operation_id: op.operation_id,
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            change_kind: op.change_kind,
            index_name: index_name.to_string(),
            document_id: document_id.clone(),
            result: None,
            entity: None,
        });

        Ok(ProcessOutcome::Deleted {
            document_id,
            outcome,
        })
    }

    async fn apply_write(
        &self,
        op: &IndexOperation,
        config: &EntityTypeConfig,
    ) -> Result<ProcessOutcome, SyncError> {
        let entity = match &self.resolver {
            Some(resolver) => match resolver.resolve(&op.entity_type, &op.entity_id).await? {
                Some(entity) => entity,
                None => {
                    debug!("Entity no longer exists, skipping write");
                    return Ok(ProcessOutcome::Skipped);
                }
            },
            None => op.payload.clone().ok_or_else(|| {
                SyncError::terminal(format!(
                    "{} operation {} carries no payload",
                    op.change_kind, op.operation_id
                ))
            })?,
        };

        let document = self.mapper.to_document(&entity, &config.mapper_options)?;
        let document_id = Document::document_id(&config.document_type, &document.id);
        let body = document.into_value();

        // cooperative cancellation before the write
        if self.queue.is_superseded(op.operation_id) {
            debug!("Operation superseded while mapping, discarding write");
            return Ok(ProcessOutcome::Superseded);
        }

        let index_name = config.index_name();
        let response = self
            .call(
                op,
                index_name,
                self.client
                    .index(index_name, &config.document_type, &document_id, &body),
            )
            .await?;

        // without a listener for matches the follow-up query is skipped
        let wants_percolation =
            config.percolate && self.callbacks.has_percolate_handlers(&op.entity_type);
        let matched_rule_ids = match response.percolated {
            Some(matched) => matched,
            None if wants_percolation => {
                self.call(
                    op,
                    index_name,
                    self.client
                        .percolate(index_name, &config.document_type, &body),
                )
                .await?
            }
            None => Default::default(),
        };

        debug!(
            index = %index_name,
            doc_id = %document_id,
            result = ?response.result,
            matched_rules = matched_rule_ids.len(),
            "Document indexed"
        );

        let callback_failures = self.callbacks.dispatch_indexed(&IndexedEvent {
            operation_id: op.operation_id,
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            change_kind: op.change_kind,
            index_name: index_name.to_string(),
            document_id: document_id.clone(),
            result: Some(response.result),
            entity: Some(entity),
        });

        let percolation = PercolationMatch::from_rule_ids(
            op.operation_id,
            op.entity_type.clone(),
            op.entity_id.clone(),
            matched_rule_ids,
        );
        let percolate_failures = percolation
            .as_ref()
            .map(|matched| self.callbacks.dispatch_percolated(matched))
            .unwrap_or_default();

        let failed_callbacks = callback_failures.len() + percolate_failures.len();
        if failed_callbacks > 0 {
            self.stats.record_callback_failures(failed_callbacks as u64);
        }

        Ok(ProcessOutcome::Indexed {
            document_id,
            result: response.result,
            percolation,
        })
    }

    /// Run an engine call under the destination throttle and the request timeout.
    ///
    /// The call only starts while the lease on `op` has at least a request timeout
    /// left, so it completes before the operation can be redelivered.
    async fn call<T, F>(
        &self,
        op: &IndexOperation,
        index_name: &str,
        request: F,
    ) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SearchIndexError>>,
    {
        self.throttle.wait(index_name).await;

        let remaining = self
            .queue
            .lease_remaining(op.operation_id, op.attempt_count)
            .unwrap_or_default();
        if remaining <= self.request_timeout {
            return Err(SyncError::transient(format!(
                "Lease {} on operation {} has {}ms left, not enough for an engine call",
                op.attempt_count,
                op.operation_id,
                remaining.as_millis()
            )));
        }

        let result = match timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SearchIndexError::timeout(
                self.request_timeout.as_millis() as u64,
            )),
        };

        match &result {
            Ok(_) => self.throttle.record_success(index_name),
            Err(e) if e.is_throttling() => self.throttle.record_failure(index_name),
            Err(_) => {}
        }

        result.map_err(SyncError::from)
    }

    /// Process a leased operation and settle it with the queue.
    pub async fn handle(&self, op: IndexOperation) -> Result<ProcessOutcome, SyncError> {
        let operation_id = op.operation_id;

        match self.process_one(&op).await {
            Ok(outcome) => {
                self.stats.record(&outcome);
                if let Err(e) = self.queue.ack(operation_id, op.attempt_count) {
                    warn!(operation_id = %operation_id, error = %e, "Failed to ack operation");
                }
                Ok(outcome)
            }
            Err(e) => {
                self.stats.record_failure();
                if e.is_retryable() {
                    warn!(
                        operation_id = %operation_id,
                        entity_type = %op.entity_type,
                        entity_id = %op.entity_id,
                        attempt = op.attempt_count,
                        max_attempts = self.queue.config().retry.max_attempts,
                        error = %e,
                        "Operation failed with retryable error"
                    );
                } else {
                    error!(
                        operation_id = %operation_id,
                        entity_type = %op.entity_type,
                        entity_id = %op.entity_id,
                        change_kind = %op.change_kind,
                        attempt = op.attempt_count,
                        sequence = op.sequence,
                        committed_at = %op.committed_at,
                        version_token = ?op.version_token,
                        payload = ?op.payload,
                        error = %e,
                        "Operation failed with terminal error"
                    );
                }

                if let Err(nack_error) =
                    self.queue.nack(operation_id, op.attempt_count, &e).await
                {
                    warn!(operation_id = %operation_id, error = %nack_error, "Failed to nack operation");
                }
                Err(e)
            }
        }
    }

    /// Process every operation that is deliverable right now. Returns how many were handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(op) = self.queue.try_dequeue().await {
            let _ = self.handle(op).await;
            handled += 1;
        }
        handled
    }

    /// Pull and process operations until shutdown or until the queue closes.
    pub async fn run(&self, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        info!(worker_id, "Index sync worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(worker_id, "Worker received shutdown signal");
                    break;
                }
                op = self.queue.dequeue() => {
                    match op {
                        Some(op) => {
                            let _ = self.handle(op).await;
                        }
                        None => {
                            debug!(worker_id, "Queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(worker_id, "Index sync worker stopped");
    }
}
