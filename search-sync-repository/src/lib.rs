//! # Search Sync Repository
//!
//! This crate provides the search engine client interface used by the sync workers.
//! It includes definitions for errors, the `SearchEngineClient` trait, index
//! definitions, and a concrete implementation for OpenSearch.

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;
pub mod utils;

pub use config::SearchClientConfig;
pub use errors::SearchIndexError;
pub use interfaces::SearchEngineClient;
pub use opensearch::{IndexDefinition, OpenSearchClient};
pub use types::{DeleteOutcome, IndexResponse, WriteResult};
pub use utils::{classify_status, validate_document_id};
