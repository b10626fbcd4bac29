//! OpenSearch implementation of the search engine client.
//!
//! This module provides a concrete implementation of `SearchEngineClient`
//! using OpenSearch as the backend.

mod client;
mod index_config;

pub use client::OpenSearchClient;
pub use index_config::{
    percolate_query, IndexDefinition, DEFAULT_INDEX_NAME, DOCUMENT_TYPE_FIELD, INDEXED_AT_FIELD,
    PERCOLATOR_FIELD,
};
