//! Tracing initialization for hosts embedding the pipeline.

use std::env;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::IndexingError;

/// Default log filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "search_sync=info,search_sync_repository=info";

/// Initialize tracing/logging.
///
/// JSON output is used when `LOG_FORMAT=json` or `AXIOM_TOKEN` is set (structured logs
/// for an ingest pipeline); pretty console output otherwise.
pub fn init_tracing() -> Result<(), IndexingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
        || env::var("AXIOM_TOKEN").is_ok();

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(|e| IndexingError::config(format!("Failed to initialize tracing: {}", e)))?;

        info!(
            service_name = "search-sync",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .try_init()
            .map_err(|e| IndexingError::config(format!("Failed to initialize tracing: {}", e)))?;

        info!(
            service_name = "search-sync",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }

    Ok(())
}

/// Load a `.env` file if present, then initialize tracing.
pub fn init() -> Result<(), IndexingError> {
    dotenv::dotenv().ok();
    init_tracing()
}
