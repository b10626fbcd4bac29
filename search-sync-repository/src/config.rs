//! Configuration types for the search engine client.

use std::time::Duration;

/// Default bound on a single search engine request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a search engine client.
///
/// The request timeout is applied at the transport level. The sync worker applies its
/// own timeout on top of it, so a hung connection always surfaces as a retryable error.
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    /// Maximum time a single request may take.
    ///
    /// Set to `None` to rely only on the worker-side timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl SearchClientConfig {
    /// Create a config with no transport-level timeout.
    pub fn unbounded() -> Self {
        Self {
            request_timeout: None,
        }
    }

    /// Create a config with a custom request timeout.
    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self {
            request_timeout: Some(request_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(
            SearchClientConfig::default().request_timeout,
            Some(DEFAULT_REQUEST_TIMEOUT)
        );
        assert!(SearchClientConfig::unbounded().request_timeout.is_none());
    }
}
