//! # Search Sync Shared
//!
//! This crate defines the data structures shared across the search sync pipeline.
//! It includes the change events produced by the host, the index operations owned by
//! the sync queue, and the documents and percolation results produced while indexing.

pub mod types;

pub use types::change_event::{ChangeEvent, ChangeKind};
pub use types::entity_record::{Document, EntityRecord};
pub use types::index_operation::{
    AttemptFailure, IndexOperation, InvalidTransition, OperationStatus, PartitionKey,
};
pub use types::percolation::PercolationMatch;
