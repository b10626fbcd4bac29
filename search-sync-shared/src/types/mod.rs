//! This module defines the core data structures used across the search sync pipeline.
//! It re-exports the change, operation, document and percolation types.

pub mod change_event;
pub mod entity_record;
pub mod index_operation;
pub mod percolation;

pub use change_event::{ChangeEvent, ChangeKind};
pub use entity_record::{Document, EntityRecord};
pub use index_operation::{
    AttemptFailure, IndexOperation, InvalidTransition, OperationStatus, PartitionKey,
};
pub use percolation::PercolationMatch;
