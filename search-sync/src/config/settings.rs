//! Runtime settings loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::warn;

use search_sync_repository::opensearch::DEFAULT_INDEX_NAME;

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Default number of concurrent workers.
const DEFAULT_WORKERS: usize = 4;

/// Default maximum number of unsettled operations.
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default lease length of a dequeued operation.
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Default maximum delivery attempts before dead-lettering.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first redelivery.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

/// Default upper bound of the redelivery delay.
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default bound on a single search engine call.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at the configured interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse a connection mode.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Defaults to "retry" if not set or invalid.
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Redelivery policy for failed operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries allowed before an operation is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first redelivery; doubles on each further attempt.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Randomize delays so workers retrying the same index spread out.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivering an operation whose `attempt`-th delivery failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = (self.initial_backoff.as_millis() as u64 / 2).max(1);
        let delay = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_backoff)
            .nth(attempt.saturating_sub(1) as usize)
            .unwrap_or(self.max_backoff);

        if self.jitter {
            jitter(delay)
        } else {
            delay
        }
    }

    /// Whether another delivery is allowed after `attempts` deliveries.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Configuration of the index sync queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of unsettled operations; enqueue fails beyond it.
    pub capacity: usize,
    /// How long a dequeued operation stays leased before it is redelivered.
    pub visibility_timeout: Duration,
    pub retry: RetryPolicy,
}

impl QueueConfig {
    /// Longest a destination pause may hold a worker: the retry ceiling, capped at a
    /// quarter of the visibility timeout.
    pub fn max_throttle_pause(&self) -> Duration {
        self.retry.max_backoff.min(self.visibility_timeout / 4)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// All settings of the sync pipeline.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub opensearch_url: String,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    /// Index used by entity types that do not name one.
    pub default_index: String,
    pub workers: usize,
    pub queue: QueueConfig,
    /// Bound on every search engine call.
    pub request_timeout: Duration,
    /// Append-only journal making the queue survive restarts.
    pub journal_path: Option<PathBuf>,
    /// Dead-letter file; when absent, dead letters are kept in memory.
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncSettings {
    /// Load settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Connection retry interval (default: 15)
    /// - `SEARCH_SYNC_DEFAULT_INDEX`: Default index name (default: search_sync)
    /// - `SEARCH_SYNC_WORKERS`: Number of workers (default: 4)
    /// - `SEARCH_SYNC_QUEUE_CAPACITY`: Maximum unsettled operations (default: 10000)
    /// - `SEARCH_SYNC_VISIBILITY_TIMEOUT_SECS`: Lease length (default: 30)
    /// - `SEARCH_SYNC_MAX_ATTEMPTS`: Deliveries before dead-lettering (default: 5)
    /// - `SEARCH_SYNC_INITIAL_BACKOFF_MS`: First redelivery delay (default: 200)
    /// - `SEARCH_SYNC_MAX_BACKOFF_MS`: Redelivery delay cap (default: 30000)
    /// - `SEARCH_SYNC_REQUEST_TIMEOUT_MS`: Search engine call timeout (default: 10000)
    /// - `SEARCH_SYNC_JOURNAL_PATH`: Queue journal file (default: none, in-memory queue)
    /// - `SEARCH_SYNC_DEAD_LETTER_PATH`: Dead-letter file (default: none, in-memory)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: u64| parse_or(&lookup, key, default);

        let queue = QueueConfig {
            capacity: parse_or(&lookup, "SEARCH_SYNC_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            visibility_timeout: Duration::from_secs(parse(
                "SEARCH_SYNC_VISIBILITY_TIMEOUT_SECS",
                DEFAULT_VISIBILITY_TIMEOUT_SECS,
            )),
            retry: RetryPolicy {
                max_attempts: parse_or(&lookup, "SEARCH_SYNC_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                    .max(1),
                initial_backoff: Duration::from_millis(parse(
                    "SEARCH_SYNC_INITIAL_BACKOFF_MS",
                    DEFAULT_INITIAL_BACKOFF_MS,
                )),
                max_backoff: Duration::from_millis(parse(
                    "SEARCH_SYNC_MAX_BACKOFF_MS",
                    DEFAULT_MAX_BACKOFF_MS,
                )),
                jitter: true,
            },
        };

        Self {
            opensearch_url: lookup("OPENSEARCH_URL")
                .unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string()),
            connection_mode: ConnectionMode::parse(lookup("OPENSEARCH_CONNECTION_MODE")),
            retry_interval: Duration::from_secs(parse(
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )),
            default_index: lookup("SEARCH_SYNC_DEFAULT_INDEX")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            workers: parse_or(&lookup, "SEARCH_SYNC_WORKERS", DEFAULT_WORKERS).max(1),
            queue,
            request_timeout: Duration::from_millis(parse(
                "SEARCH_SYNC_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            journal_path: lookup("SEARCH_SYNC_JOURNAL_PATH").map(PathBuf::from),
            dead_letter_path: lookup("SEARCH_SYNC_DEAD_LETTER_PATH").map(PathBuf::from),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = key, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();

        assert_eq!(settings.opensearch_url, DEFAULT_OPENSEARCH_URL);
        assert_eq!(settings.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.default_index, DEFAULT_INDEX_NAME);
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.queue.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(settings.journal_path.is_none());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENSEARCH_URL", "http://search:9200"),
            ("OPENSEARCH_CONNECTION_MODE", "Fail-Fast"),
            ("SEARCH_SYNC_WORKERS", "8"),
            ("SEARCH_SYNC_MAX_ATTEMPTS", "3"),
            ("SEARCH_SYNC_VISIBILITY_TIMEOUT_SECS", "5"),
            ("SEARCH_SYNC_JOURNAL_PATH", "/var/lib/search-sync/journal.jsonl"),
        ]);

        let settings = SyncSettings::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.opensearch_url, "http://search:9200");
        assert_eq!(settings.connection_mode, ConnectionMode::FailFast);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.queue.retry.max_attempts, 3);
        assert_eq!(settings.queue.visibility_timeout, Duration::from_secs(5));
        assert_eq!(
            settings.journal_path,
            Some(PathBuf::from("/var/lib/search-sync/journal.jsonl"))
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let settings = SyncSettings::from_lookup(|key| match key {
            "SEARCH_SYNC_WORKERS" => Some("many".to_string()),
            "OPENSEARCH_CONNECTION_MODE" => Some("sometimes".to_string()),
            "SEARCH_SYNC_MAX_ATTEMPTS" => Some("0".to_string()),
            _ => None,
        });

        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.queue.retry.max_attempts, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            jitter: false,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(30), Duration::from_millis(500));
    }

    #[test]
    fn test_jittered_backoff_stays_below_delay() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            ..RetryPolicy::default()
        };

        for _ in 0..20 {
            assert!(policy.backoff(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_throttle_pause_stays_inside_lease() {
        let defaults = QueueConfig::default();
        assert_eq!(defaults.max_throttle_pause(), Duration::from_millis(7_500));
        assert!(defaults.max_throttle_pause() < defaults.visibility_timeout);

        let short_backoff = QueueConfig {
            retry: RetryPolicy {
                max_backoff: Duration::from_secs(1),
                ..RetryPolicy::default()
            },
            ..QueueConfig::default()
        };
        assert_eq!(short_backoff.max_throttle_pause(), Duration::from_secs(1));
    }

    #[test]
    fn test_allows_retry() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }
}
