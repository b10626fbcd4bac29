//! Error types for the search sync pipeline.

use search_sync_repository::SearchIndexError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the search sync pipeline.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The queue already holds its maximum number of unsettled operations.
    #[error("Queue saturated: capacity of {capacity} operations reached")]
    QueueSaturated { capacity: usize },

    /// A failure worth retrying (timeouts, connection loss, throttling).
    #[error("Transient error: {0}")]
    Transient(String),

    /// A failure that will repeat on every attempt.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// A post-index callback failed.
    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    /// No configuration is registered for the entity type.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The durable journal could not be read or written.
    #[error("Journal error: {0}")]
    Journal(String),

    /// The queue has been closed and accepts no more work.
    #[error("Queue closed")]
    QueueClosed,

    /// The operation is not leased from this queue.
    #[error("Unknown operation: {0}")]
    UnknownOperation(Uuid),
}

impl SyncError {
    /// Create a transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a terminal error.
    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal(msg.into())
    }

    /// Create a journal error.
    pub fn journal(msg: impl Into<String>) -> Self {
        Self::Journal(msg.into())
    }

    /// Whether the failed operation should be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<SearchIndexError> for SyncError {
    fn from(err: SearchIndexError) -> Self {
        if err.is_retryable() {
            Self::Transient(err.to_string())
        } else {
            Self::Terminal(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Journal(err.to_string())
    }
}

/// A callback handler failure. Never affects the status of the operation it was fired for.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{hook} handler #{handler_index} for {entity_type}/{entity_id} failed: {message}")]
pub struct CallbackError {
    /// Which hook fired (`on_indexed` or `on_percolated`).
    pub hook: &'static str,
    /// Position of the handler in registration order.
    pub handler_index: usize,
    pub operation_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    /// Whether the handler panicked rather than returning an error.
    pub panicked: bool,
}
