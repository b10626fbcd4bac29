//! Index operations owned by the sync queue.
//!
//! An [`IndexOperation`] is the unit of work the queue hands to a worker. Its status
//! only moves along the transitions checked by [`OperationStatus::can_transition_to`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change_event::{ChangeEvent, ChangeKind};
use super::entity_record::EntityRecord;

/// Lifecycle status of an index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting in the queue.
    Pending,
    /// Leased by a worker.
    InFlight,
    /// Applied to the index (or discarded as superseded). Terminal.
    Succeeded,
    /// Gave up on the operation. Terminal.
    Failed,
}

impl OperationStatus {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    ///
    /// `pending -> in_flight`, `pending -> succeeded` (superseded without delivery),
    /// `pending -> failed` (attempts exhausted while waiting), `in_flight -> pending`,
    /// `in_flight -> succeeded`, `in_flight -> failed`. Terminal states never move.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Succeeded)
                | (Pending, Failed)
                | (InFlight, Pending)
                | (InFlight, Succeeded)
                | (InFlight, Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: OperationStatus,
    pub to: OperationStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid status transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Sequencing key used by the queue to serialize delivery per entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// One failed attempt, kept for the dead-letter record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub error: String,
    pub retryable: bool,
    pub failed_at: DateTime<Utc>,
}

impl AttemptFailure {
    pub fn new(attempt: u32, error: impl Into<String>, retryable: bool) -> Self {
        Self {
            attempt,
            error: error.into(),
            retryable,
            failed_at: Utc::now(),
        }
    }
}

/// A pending write or delete against the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
    pub operation_id: Uuid,
    pub entity_id: String,
    pub entity_type: String,
    pub change_kind: ChangeKind,
    /// Entity snapshot for create/update; always `None` for delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EntityRecord>,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: OperationStatus,
    /// Commit time of the originating change event.
    pub committed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_token: Option<String>,
    /// Per-entity sequence number, assigned by the queue on enqueue.
    #[serde(default)]
    pub sequence: u64,
}

impl IndexOperation {
    /// Build a pending operation from a change event.
    ///
    /// The payload is dropped for deletes, which only need the entity id.
    pub fn from_event(event: ChangeEvent, payload: Option<EntityRecord>) -> Self {
        let payload = if event.change_kind.is_write() {
            payload
        } else {
            None
        };

        Self {
            operation_id: Uuid::new_v4(),
            entity_id: event.entity_id,
            entity_type: event.entity_type,
            change_kind: event.change_kind,
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            status: OperationStatus::Pending,
            committed_at: event.committed_at,
            version_token: event.version_token,
            sequence: 0,
        }
    }

    /// Build a create/update operation directly from an entity snapshot.
    pub fn upsert(record: EntityRecord, change_kind: ChangeKind) -> Self {
        let event = ChangeEvent::new(
            record.entity_type.clone(),
            record.entity_id.clone(),
            change_kind,
        );
        Self::from_event(event, Some(record))
    }

    /// Build a delete operation.
    pub fn delete(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::from_event(
            ChangeEvent::new(entity_type, entity_id, ChangeKind::Delete),
            None,
        )
    }

    /// The sequencing key for this operation's entity.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
        }
    }

    /// Move to a new status, rejecting illegal transitions.
    pub fn transition(&mut self, next: OperationStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == OperationStatus::InFlight {
            self.attempt_count += 1;
        }
        self.status = next;
        Ok(())
    }
}
