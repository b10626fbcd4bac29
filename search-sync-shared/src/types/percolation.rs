//! Percolation results attached to a completed index operation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored queries that matched a freshly indexed document.
///
/// Produced from the search engine response and handed to percolate callbacks.
/// Never persisted beyond the callback invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercolationMatch {
    pub operation_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub matched_rule_ids: BTreeSet<String>,
}

impl PercolationMatch {
    /// Build a match from the rule ids returned by the engine.
    ///
    /// Returns `None` when no rule matched, so callers never dispatch an empty match.
    pub fn from_rule_ids<I, S>(
        operation_id: Uuid,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        rule_ids: I,
    ) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let matched_rule_ids: BTreeSet<String> = rule_ids.into_iter().map(Into::into).collect();
        if matched_rule_ids.is_empty() {
            return None;
        }
        Some(Self {
            operation_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            matched_rule_ids,
        })
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.matched_rule_ids.contains(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rule_ids() {
        let id = Uuid::new_v4();
        let m = PercolationMatch::from_rule_ids(id, "article", "1", ["r1", "r2", "r1"]).unwrap();

        assert_eq!(m.operation_id, id);
        assert_eq!(m.matched_rule_ids.len(), 2);
        assert!(m.contains("r1"));
    }

    #[test]
    fn test_empty_rule_ids_is_none() {
        let none: Vec<String> = Vec::new();
        assert!(PercolationMatch::from_rule_ids(Uuid::new_v4(), "article", "1", none).is_none());
    }
}
