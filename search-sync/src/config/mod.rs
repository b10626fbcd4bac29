//! Configuration for the search sync pipeline.
//!
//! This module handles loading runtime settings from the environment, the explicit
//! per entity type registry, and wiring the pipeline together.

mod dependencies;
mod registry;
mod settings;

pub use dependencies::Dependencies;
pub use registry::{EntityRegistry, EntityTypeConfig};
pub use settings::{ConnectionMode, QueueConfig, RetryPolicy, SyncSettings};
