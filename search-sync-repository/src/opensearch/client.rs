//! OpenSearch client implementation.
//!
//! This module provides the concrete implementation of `SearchEngineClient`
//! using the OpenSearch Rust crate.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use opensearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    DeleteParts, IndexParts, OpenSearch, SearchParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use url::Url;

use crate::config::SearchClientConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::SearchEngineClient;
use crate::opensearch::index_config::{
    percolate_query, IndexDefinition, DOCUMENT_TYPE_FIELD, INDEXED_AT_FIELD,
};
use crate::types::{DeleteOutcome, IndexResponse, WriteResult};
use crate::utils::{classify_status, validate_document_id};

/// OpenSearch client implementation.
///
/// OpenSearch has no mapping types, so the document type is stored as a keyword field
/// on every document. Percolation is a separate query against the percolator field,
/// which means index responses never carry inline matches.
///
/// # Example
///
/// ```ignore
/// use search_sync_repository::{OpenSearchClient, SearchClientConfig, SearchEngineClient};
/// use serde_json::json;
///
/// let client = OpenSearchClient::new("http://localhost:9200", SearchClientConfig::default()).await?;
/// client
///     .index("articles", "article", "article_42", &json!({ "title": "Hello" }))
///     .await?;
/// ```
pub struct OpenSearchClient {
    client: OpenSearch,
}

impl OpenSearchClient {
    /// Create a new OpenSearch client connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `config` - Client configuration (request timeout)
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchClient)` - A new client instance
    /// * `Err(SearchIndexError)` - If connection setup fails
    pub async fn new(url: &str, config: SearchClientConfig) -> Result<Self, SearchIndexError> {
        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let mut builder = TransportBuilder::new(conn_pool).disable_proxy();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let transport = builder
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            request_timeout_ms = config.request_timeout.map(|t| t.as_millis() as u64),
            "Created OpenSearch client"
        );

        Ok(Self { client })
    }

    /// Build the stored document body.
    ///
    /// The document must be a JSON object; the document type and write time are added.
    fn document_body(document_type: &str, document: &Value) -> Result<Value, SearchIndexError> {
        let mut body = match document {
            Value::Object(map) => map.clone(),
            other => {
                return Err(SearchIndexError::malformed_document(format!(
                    "Document must be a JSON object, got {}",
                    json_kind(other)
                )))
            }
        };
        body.insert(DOCUMENT_TYPE_FIELD.to_string(), json!(document_type));
        body.insert(INDEXED_AT_FIELD.to_string(), json!(Utc::now().to_rfc3339()));
        Ok(Value::Object(body))
    }

    /// Extract matched query ids from a percolate search response.
    fn parse_percolate_hits(response: &Value) -> Result<BTreeSet<String>, SearchIndexError> {
        let hits = response["hits"]["hits"]
            .as_array()
            .ok_or_else(|| SearchIndexError::parse("Percolate response has no hits array"))?;

        Ok(hits
            .iter()
            .filter_map(|hit| hit["_id"].as_str().map(str::to_string))
            .collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl SearchEngineClient for OpenSearchClient {
    /// Ensure the index exists, creating it with its settings and mappings if not.
    ///
    /// An index created concurrently by another process is accepted.
    async fn ensure_index(&self, definition: &IndexDefinition) -> Result<(), SearchIndexError> {
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[&definition.index_name]))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if exists.status_code().is_success() {
            debug!(index = %definition.index_name, "Index already exists");
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&definition.index_name))
            .body(definition.body())
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if error_body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            error!(status = %status, body = %error_body, "Index creation failed");
            return Err(SearchIndexError::index_creation(format!(
                "Creating index {} failed with status {}: {}",
                definition.index_name, status, error_body
            )));
        }

        info!(
            index = %definition.index_name,
            percolator = definition.percolator,
            "Created index"
        );
        Ok(())
    }

    /// Write a document, replacing any existing one with the same id.
    async fn index(
        &self,
        index_name: &str,
        document_type: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, SearchIndexError> {
        validate_document_id(id)?;
        let body = Self::document_body(document_type, document)?;

        let response = self
            .client
            .index(IndexParts::IndexId(index_name, id))
            .body(body)
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, doc_id = %id, "Index request failed");
            return Err(classify_status(status.as_u16(), &error_body));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        let result = WriteResult::from_result_field(parsed["result"].as_str());

        debug!(index = %index_name, doc_id = %id, result = ?result, "Document indexed");
        Ok(IndexResponse::written(result))
    }

    /// Delete a document; a missing document is not an error.
    async fn delete(
        &self,
        index_name: &str,
        _document_type: &str,
        id: &str,
    ) -> Result<DeleteOutcome, SearchIndexError> {
        validate_document_id(id)?;

        let response = self
            .client
            .delete(DeleteParts::IndexId(index_name, id))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if status.is_success() {
            debug!(index = %index_name, doc_id = %id, "Document deleted");
            return Ok(DeleteOutcome::Deleted);
        }

        let error_body = response.text().await.unwrap_or_default();

        // 404 for the document is fine, 404 for the index is not
        if status.as_u16() == 404 && !error_body.contains("index_not_found_exception") {
            debug!(index = %index_name, doc_id = %id, "Document already absent");
            return Ok(DeleteOutcome::NotFound);
        }

        error!(status = %status, body = %error_body, doc_id = %id, "Delete request failed");
        Err(classify_status(status.as_u16(), &error_body))
    }

    /// Run the document against the stored percolator queries of the index.
    async fn percolate(
        &self,
        index_name: &str,
        document_type: &str,
        document: &Value,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        let body = Self::document_body(document_type, document)?;

        let response = self
            .client
            .search(SearchParts::Index(&[index_name]))
            .body(percolate_query(&body))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Percolate request failed");
            return Err(classify_status(status.as_u16(), &error_body));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        Self::parse_percolate_hits(&parsed)
    }
}
