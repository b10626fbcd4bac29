//! Search engine client trait definition.
//!
//! This module defines the wire-level interface the sync workers use, allowing for
//! different backend implementations (OpenSearch, Elasticsearch, in-memory fakes).

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::opensearch::IndexDefinition;
use crate::types::{DeleteOutcome, IndexResponse};

/// Abstracts the underlying search engine.
///
/// All calls are awaited by the worker under a bounded timeout. Implementations must be
/// idempotent per document id: `index` replaces the whole document (upsert) and `delete`
/// treats a missing document as success. That is what makes at-least-once redelivery safe.
#[async_trait]
pub trait SearchEngineClient: Send + Sync {
    /// Ensure an index exists with the given settings and mappings, creating it if necessary.
    ///
    /// Called once per configured entity type at startup.
    async fn ensure_index(&self, definition: &IndexDefinition) -> Result<(), SearchIndexError>;

    /// Write a document, replacing any existing document with the same id.
    ///
    /// # Arguments
    ///
    /// * `index_name` - The destination index
    /// * `document_type` - The document type of the entity
    /// * `id` - The stable document id
    /// * `document` - The document body (a JSON object)
    ///
    /// # Returns
    ///
    /// * `Ok(IndexResponse)` - The write result and, for engines that percolate inline,
    ///   the matching rule ids
    /// * `Err(SearchIndexError)` - If the write fails
    async fn index(
        &self,
        index_name: &str,
        document_type: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, SearchIndexError>;

    /// Delete a document if it exists.
    ///
    /// A document that doesn't exist is reported as [`DeleteOutcome::NotFound`], not an error.
    async fn delete(
        &self,
        index_name: &str,
        document_type: &str,
        id: &str,
    ) -> Result<DeleteOutcome, SearchIndexError>;

    /// Return the ids of stored queries matching `document`.
    async fn percolate(
        &self,
        index_name: &str,
        document_type: &str,
        document: &Value,
    ) -> Result<BTreeSet<String>, SearchIndexError>;
}
