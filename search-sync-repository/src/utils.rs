//! Utility functions for the search sync repository.

use crate::errors::SearchIndexError;

/// Map a non-success HTTP status and response body to a classified error.
///
/// The classification decides whether the worker retries: 429 and 5xx are transient,
/// parse and mapping failures are terminal, and a missing index is terminal.
///
/// # Example
///
/// ```
/// use search_sync_repository::{classify_status, SearchIndexError};
///
/// let err = classify_status(503, "no shards available");
/// assert!(err.is_retryable());
///
/// let err = classify_status(400, r#"{"error":{"type":"mapper_parsing_exception"}}"#);
/// assert!(matches!(err, SearchIndexError::MalformedDocument(_)));
/// ```
pub fn classify_status(status: u16, body: &str) -> SearchIndexError {
    match status {
        429 => SearchIndexError::rate_limited(body),
        500..=599 => SearchIndexError::unavailable(status, body),
        404 if body.contains("index_not_found_exception") => {
            SearchIndexError::index_not_found(body)
        }
        400 if body.contains("mapper_parsing_exception")
            || body.contains("document_parsing_exception")
            || body.contains("parse_exception") =>
        {
            SearchIndexError::malformed_document(body)
        }
        400 if body.contains("strict_dynamic_mapping_exception")
            || body.contains("illegal_argument_exception") =>
        {
            SearchIndexError::mapping_conflict(body)
        }
        _ => SearchIndexError::rejected(status, body),
    }
}

/// Validate a document id before sending it to the engine.
pub fn validate_document_id(id: &str) -> Result<(), SearchIndexError> {
    if id.trim().is_empty() {
        return Err(SearchIndexError::validation("Document id cannot be empty"));
    }
    if id.len() > 512 {
        return Err(SearchIndexError::validation(format!(
            "Document id is {} bytes, maximum is 512",
            id.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_retryable() {
        assert!(matches!(
            classify_status(429, "too many requests"),
            SearchIndexError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(502, "bad gateway"),
            SearchIndexError::Unavailable { status: 502, .. }
        ));
    }

    #[test]
    fn test_classify_status_terminal() {
        assert!(matches!(
            classify_status(404, r#"{"error":{"type":"index_not_found_exception"}}"#),
            SearchIndexError::IndexNotFound(_)
        ));
        assert!(matches!(
            classify_status(400, r#"{"error":{"type":"strict_dynamic_mapping_exception"}}"#),
            SearchIndexError::MappingConflict(_)
        ));
        assert!(matches!(
            classify_status(400, r#"{"error":{"type":"document_parsing_exception"}}"#),
            SearchIndexError::MalformedDocument(_)
        ));
        assert!(matches!(
            classify_status(403, "forbidden"),
            SearchIndexError::Rejected { status: 403, .. }
        ));
        assert!(!classify_status(409, "version conflict").is_retryable());
    }

    #[test]
    fn test_validate_document_id() {
        assert!(validate_document_id("articles_42").is_ok());
        assert!(validate_document_id("").is_err());
        assert!(validate_document_id("   ").is_err());
        assert!(validate_document_id(&"x".repeat(513)).is_err());
    }
}
