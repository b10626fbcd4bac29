//! Search index error types.
//!
//! This module defines the unified error type for all search engine calls, split into
//! errors that are worth retrying and errors that will fail again no matter what.

use thiserror::Error;

/// Unified errors from search engine calls.
///
/// Used by the `SearchEngineClient` trait. [`SearchIndexError::is_retryable`] tells the
/// sync worker whether an operation should be retried with backoff or failed immediately.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., empty document id, empty index name).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the search engine.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The request did not complete within its timeout.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// The engine answered with a 5xx status.
    #[error("Engine unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The engine is throttling requests (429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The engine rejected the document body.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// The document does not fit the index mapping.
    #[error("Mapping conflict: {0}")]
    MappingConflict(String),

    /// The target index does not exist.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Failed to create the search index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// The engine rejected the request for another reason.
    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Failed to parse response from the search engine.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize data for the search engine.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout(elapsed_ms)
    }

    /// Create an unavailable error.
    pub fn unavailable(status: u16, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            message: msg.into(),
        }
    }

    /// Create a rate limited error.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a malformed document error.
    pub fn malformed_document(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }

    /// Create a mapping conflict error.
    pub fn mapping_conflict(msg: impl Into<String>) -> Self {
        Self::MappingConflict(msg.into())
    }

    /// Create an index not found error.
    pub fn index_not_found(index_name: impl Into<String>) -> Self {
        Self::IndexNotFound(index_name.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create a rejected request error.
    pub fn rejected(status: u16, msg: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: msg.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Whether the failure is transient and the call may succeed if retried.
    ///
    /// Timeouts, transport failures, throttling and 5xx responses are retryable.
    /// Everything else will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_)
                | Self::Timeout(_)
                | Self::Unavailable { .. }
                | Self::RateLimited(_)
        )
    }

    /// Whether the engine asked us to slow down for the whole destination index.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable { .. })
    }
}
