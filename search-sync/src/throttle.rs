//! Shared backoff state keyed by destination index.
//!
//! When the engine throttles (429) or fails (5xx) a call to an index, every worker
//! pauses calls to that index until the backoff elapses. A success clears the state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct ThrottleState {
    consecutive_failures: u32,
    paused_until: Instant,
}

/// Per destination index backoff counter shared by all workers.
#[derive(Debug)]
pub struct DestinationThrottle {
    base_delay: Duration,
    max_delay: Duration,
    state: Mutex<HashMap<String, ThrottleState>>,
}

impl DestinationThrottle {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until calls to `index_name` are allowed again.
    pub async fn wait(&self, index_name: &str) {
        if let Some(until) = self.paused_until(index_name) {
            if until > Instant::now() {
                debug!(index = %index_name, "Waiting for destination backoff");
                sleep_until(until).await;
            }
        }
    }

    /// Instant until which calls to `index_name` are paused, if any.
    pub fn paused_until(&self, index_name: &str) -> Option<Instant> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.get(index_name).map(|s| s.paused_until))
    }

    /// Register a throttling failure and extend the pause.
    pub fn record_failure(&self, index_name: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let failures = state
            .get(index_name)
            .map_or(1, |s| s.consecutive_failures.saturating_add(1));

        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        state.insert(
            index_name.to_string(),
            ThrottleState {
                consecutive_failures: failures,
                paused_until: Instant::now() + delay,
            },
        );

        warn!(
            index = %index_name,
            consecutive_failures = failures,
            pause_ms = delay.as_millis() as u64,
            "Destination throttled, pausing calls"
        );
    }

    /// Clear the backoff of `index_name`.
    pub fn record_success(&self, index_name: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.remove(index_name).is_some() {
                debug!(index = %index_name, "Destination recovered");
            }
        }
    }
}
