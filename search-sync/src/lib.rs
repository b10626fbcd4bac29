//! # Search Sync
//!
//! Keeps a search index consistent with a system of record. Hosts report committed
//! entity changes; the pipeline queues them durably and applies them to OpenSearch.
//!
//! ## Architecture
//!
//! 1. **Hooks**: Receive committed changes and apply the eligibility filter
//! 2. **Queue**: Durable, per-entity ordered, at-least-once delivery of index operations
//! 3. **Worker**: Maps entities to documents and applies them to the search engine
//! 4. **Callbacks**: Run `on_indexed` / `on_percolated` handlers after successful writes
//! 5. **Orchestrator**: Runs a pool of workers and handles shutdown
//!
//! ## Modules
//!
//! - [`config`]: Settings, entity type registry, and dependency initialization
//! - [`hooks`]: Commit hooks for the host persistence layer
//! - [`eligibility`]: Per entity type indexing predicates
//! - [`mapper`]: Entity to document mapping
//! - [`queue`]: Index sync queue and its journal
//! - [`worker`]: Index sync worker
//! - [`callbacks`]: Callback dispatcher
//! - [`dead_letter`]: Dead-letter sinks
//! - [`throttle`]: Per destination index backoff
//! - [`orchestrator`]: Worker pool
//! - [`telemetry`]: Tracing setup
//! - [`errors`]: Error types for the pipeline

pub mod callbacks;
pub mod config;
pub mod dead_letter;
pub mod eligibility;
pub mod errors;
pub mod hooks;
pub mod mapper;
pub mod orchestrator;
pub mod queue;
pub mod telemetry;
pub mod throttle;
pub mod worker;

pub use callbacks::{CallbackDispatcher, IndexedEvent};
pub use config::{Dependencies, EntityRegistry, EntityTypeConfig, SyncSettings};
pub use eligibility::{EligibilityFilter, Predicate};
pub use errors::{CallbackError, SyncError};
pub use hooks::SyncHooks;
pub use mapper::{DocumentMapper, JsonDocumentMapper, MapperOptions};
pub use orchestrator::WorkerPool;
pub use queue::IndexSyncQueue;
pub use worker::{IndexSyncWorker, ProcessOutcome};

use thiserror::Error;

/// Errors that can occur during pipeline initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Sync error.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
