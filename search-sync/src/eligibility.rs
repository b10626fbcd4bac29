//! Eligibility filter deciding whether an entity change is indexed.
//!
//! A filter combines an optional positive predicate with an optional negative ("skip")
//! predicate. An entity is eligible when the positive predicate holds (or is absent) and
//! the negative predicate does not hold (or is absent). Deletes bypass the predicates:
//! a record that was indexed while eligible must still leave the index when destroyed.

use std::fmt;
use std::sync::Arc;

use search_sync_shared::{ChangeKind, EntityRecord};

/// A boolean condition evaluated against an entity snapshot.
#[derive(Clone)]
pub enum Predicate {
    /// A fixed answer.
    Flag(bool),
    /// The truthiness of a named attribute. Missing, `null` and `false` are false.
    Attribute(String),
    /// An arbitrary function of the entity.
    Function(Arc<dyn Fn(&EntityRecord) -> bool + Send + Sync>),
}

impl Predicate {
    /// Build a predicate from a closure.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&EntityRecord) -> bool + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Build a predicate reading a boolean-valued attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }

    pub fn evaluate(&self, entity: &EntityRecord) -> bool {
        match self {
            Predicate::Flag(value) => *value,
            Predicate::Attribute(name) => entity.attribute_truthy(name),
            Predicate::Function(f) => f(entity),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Flag(value) => f.debug_tuple("Flag").field(value).finish(),
            Predicate::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            Predicate::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Per entity type eligibility rules.
#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    positive: Option<Predicate>,
    negative: Option<Predicate>,
}

impl EligibilityFilter {
    /// A filter that admits every change.
    pub fn always() -> Self {
        Self::default()
    }

    /// Index only when `predicate` holds.
    pub fn only_if(mut self, predicate: Predicate) -> Self {
        self.positive = Some(predicate);
        self
    }

    /// Skip indexing when `predicate` holds. Takes precedence over the positive predicate.
    pub fn unless(mut self, predicate: Predicate) -> Self {
        self.negative = Some(predicate);
        self
    }

    /// Decide whether `change_kind` on `entity` should reach the index.
    ///
    /// Pure and synchronous; safe to call on the commit path.
    pub fn should_index(&self, entity: &EntityRecord, change_kind: ChangeKind) -> bool {
        if change_kind == ChangeKind::Delete {
            return true;
        }

        let positive = self
            .positive
            .as_ref()
            .map_or(true, |predicate| predicate.evaluate(entity));
        let negative = self
            .negative
            .as_ref()
            .is_some_and(|predicate| predicate.evaluate(entity));

        positive && !negative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article(published: bool, spam: bool) -> EntityRecord {
        EntityRecord::new("article", "1")
            .with_attribute("published", json!(published))
            .with_attribute("spam", json!(spam))
    }

    #[test]
    fn test_no_predicates_admits_everything() {
        let filter = EligibilityFilter::always();
        assert!(filter.should_index(&article(false, true), ChangeKind::Create));
    }

    #[test]
    fn test_positive_predicate() {
        let filter = EligibilityFilter::always().only_if(Predicate::attribute("published"));

        assert!(filter.should_index(&article(true, false), ChangeKind::Create));
        assert!(!filter.should_index(&article(false, false), ChangeKind::Update));
    }

    #[test]
    fn test_negative_predicate_wins() {
        for positive in [
            Predicate::Flag(true),
            Predicate::Flag(false),
            Predicate::attribute("published"),
            Predicate::function(|_| true),
        ] {
            let filter = EligibilityFilter::always()
                .only_if(positive)
                .unless(Predicate::attribute("spam"));

            assert!(!filter.should_index(&article(true, true), ChangeKind::Create));
            assert!(!filter.should_index(&article(false, true), ChangeKind::Update));
        }
    }

    #[test]
    fn test_function_predicate() {
        let filter = EligibilityFilter::always().only_if(Predicate::function(|entity| {
            entity
                .attribute("views")
                .and_then(|v| v.as_u64())
                .is_some_and(|views| views > 10)
        }));

        let popular = EntityRecord::new("article", "1").with_attribute("views", json!(11));
        let quiet = EntityRecord::new("article", "2").with_attribute("views", json!(3));

        assert!(filter.should_index(&popular, ChangeKind::Update));
        assert!(!filter.should_index(&quiet, ChangeKind::Update));
    }

    #[test]
    fn test_delete_is_always_eligible() {
        let filter = EligibilityFilter::always()
            .only_if(Predicate::Flag(false))
            .unless(Predicate::Flag(true));

        assert!(filter.should_index(&article(false, true), ChangeKind::Delete));
    }
}
