//! Change events emitted by the host persistence layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change that was committed for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was destroyed.
    Delete,
}

impl ChangeKind {
    /// Returns the lowercase name used in logs and journal records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    /// Returns true for changes that write a document (create or update).
    pub fn is_write(&self) -> bool {
        matches!(self, ChangeKind::Create | ChangeKind::Update)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed change to a domain entity.
///
/// Produced strictly after the host transaction commits. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The entity's stable identifier.
    pub entity_id: String,
    /// The entity type name (e.g. "article").
    pub entity_type: String,
    /// What happened to the entity.
    pub change_kind: ChangeKind,
    /// When the originating transaction committed.
    pub committed_at: DateTime<Utc>,
    /// Optional host version token (row version, lock version, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_token: Option<String>,
}

impl ChangeEvent {
    /// Create a change event committed now.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        change_kind: ChangeKind,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            change_kind,
            committed_at: Utc::now(),
            version_token: None,
        }
    }

    /// Attach a host version token.
    pub fn with_version_token(mut self, token: impl Into<String>) -> Self {
        self.version_token = Some(token.into());
        self
    }

    /// Override the commit timestamp.
    pub fn committed_at(mut self, committed_at: DateTime<Utc>) -> Self {
        self.committed_at = committed_at;
        self
    }
}
