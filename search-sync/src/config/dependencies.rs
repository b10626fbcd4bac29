//! Dependency initialization and wiring for the search sync pipeline.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::callbacks::CallbackDispatcher;
use crate::config::{ConnectionMode, EntityRegistry, SyncSettings};
use crate::dead_letter::{DeadLetterSink, JsonLinesDeadLetterSink, MemoryDeadLetterSink};
use crate::hooks::SyncHooks;
use crate::orchestrator::WorkerPool;
use crate::queue::IndexSyncQueue;
use crate::throttle::DestinationThrottle;
use crate::worker::IndexSyncWorker;
use crate::IndexingError;
use search_sync_repository::{OpenSearchClient, SearchClientConfig, SearchEngineClient};

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// Producer-side hooks for the host persistence layer.
    pub hooks: SyncHooks,
    /// The configured worker pool ready to run.
    pub pool: WorkerPool,
    pub queue: Arc<IndexSyncQueue>,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// See [`SyncSettings::from_env`] for the variables read.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If initialization fails (only in fail-fast mode for
    ///   connection errors)
    pub async fn new(
        registry: EntityRegistry,
        callbacks: CallbackDispatcher,
    ) -> Result<Self, IndexingError> {
        let settings = SyncSettings::from_env();

        info!(
            opensearch_url = %settings.opensearch_url,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            workers = settings.workers,
            queue_capacity = settings.queue.capacity,
            entity_types = registry.len(),
            "Initializing dependencies"
        );

        // Initialize OpenSearch client with retry logic
        let client = Self::connect_to_opensearch(
            &settings.opensearch_url,
            SearchClientConfig::with_request_timeout(settings.request_timeout),
            settings.connection_mode,
            settings.retry_interval,
        )
        .await?;

        info!("OpenSearch connection established");

        Self::with_client(settings, registry, callbacks, Arc::new(client)).await
    }

    /// Wire the pipeline around an already constructed search engine client.
    pub async fn with_client(
        settings: SyncSettings,
        registry: EntityRegistry,
        callbacks: CallbackDispatcher,
        client: Arc<dyn SearchEngineClient>,
    ) -> Result<Self, IndexingError> {
        if settings.request_timeout >= settings.queue.visibility_timeout {
            return Err(IndexingError::config(format!(
                "Request timeout ({}ms) must be shorter than the visibility timeout ({}ms)",
                settings.request_timeout.as_millis(),
                settings.queue.visibility_timeout.as_millis()
            )));
        }

        let registry = Arc::new(registry);

        // Ensure every destination index exists before accepting work
        for definition in registry.index_definitions() {
            client.ensure_index(&definition).await.map_err(|e| {
                IndexingError::config(format!(
                    "Failed to ensure index {} exists: {}",
                    definition.index_name, e
                ))
            })?;
        }

        let dead_letter: Arc<dyn DeadLetterSink> = match &settings.dead_letter_path {
            Some(path) => Arc::new(JsonLinesDeadLetterSink::open(path).map_err(|e| {
                IndexingError::config(format!("Failed to open dead-letter file: {}", e))
            })?),
            None => {
                warn!("SEARCH_SYNC_DEAD_LETTER_PATH not set, dead letters are kept in memory");
                Arc::new(MemoryDeadLetterSink::new())
            }
        };

        let queue = match &settings.journal_path {
            Some(path) => IndexSyncQueue::with_journal(settings.queue.clone(), dead_letter, path)?,
            None => {
                warn!("SEARCH_SYNC_JOURNAL_PATH not set, queued operations do not survive restarts");
                IndexSyncQueue::new(settings.queue.clone(), dead_letter)
            }
        };
        let queue = Arc::new(queue);

        let throttle = Arc::new(DestinationThrottle::new(
            settings.queue.retry.initial_backoff,
            settings.queue.max_throttle_pause(),
        ));

        let worker = IndexSyncWorker::new(
            Arc::clone(&queue),
            client,
            Arc::clone(&registry),
            Arc::new(callbacks),
        )
        .with_throttle(throttle)
        .with_request_timeout(settings.request_timeout);

        let pool = WorkerPool::new(worker, Arc::clone(&queue), settings.workers);
        let hooks = SyncHooks::new(registry, Arc::clone(&queue));

        Ok(Self { hooks, pool, queue })
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        url: &str,
        config: SearchClientConfig,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<OpenSearchClient, IndexingError> {
        loop {
            match OpenSearchClient::new(url, config.clone()).await {
                Ok(client) => return Ok(client),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(IndexingError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            opensearch_url = %url,
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }
}
