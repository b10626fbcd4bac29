//! Response types returned by search engine clients.

use std::collections::BTreeSet;

/// Result of a document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// The document did not exist before.
    Created,
    /// An existing document was replaced.
    Updated,
    /// The engine did not say.
    Unknown,
}

impl WriteResult {
    /// Parse the `result` field of an index response.
    pub fn from_result_field(result: Option<&str>) -> Self {
        match result {
            Some("created") => WriteResult::Created,
            Some("updated") => WriteResult::Updated,
            _ => WriteResult::Unknown,
        }
    }
}

/// Response to an index call.
///
/// `percolated` is `Some` only for engines that evaluate stored queries as part of the
/// write. Engines without that capability leave it `None` and the worker issues a
/// separate percolate query when the entity type asks for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResponse {
    pub result: WriteResult,
    pub percolated: Option<BTreeSet<String>>,
}

impl IndexResponse {
    /// A plain write response with no inline percolation.
    pub fn written(result: WriteResult) -> Self {
        Self {
            result,
            percolated: None,
        }
    }

    /// A write response carrying inline percolation matches.
    pub fn with_percolated<I, S>(result: WriteResult, rule_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            result,
            percolated: Some(rule_ids.into_iter().map(Into::into).collect()),
        }
    }
}

/// Outcome of a delete call. Both variants are successful deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}
