//! Entity snapshots and search documents.
//!
//! An [`EntityRecord`] is what the host hands to the pipeline when a change commits.
//! A [`Document`] is what the document mapper builds from it for the search engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of a domain entity as supplied by the host persistence layer.
///
/// # Fields
///
/// - `entity_type`: The entity type name, used to look up its index configuration
/// - `entity_id`: Stable identifier, used as the index document key
/// - `attributes`: The entity's attributes as a JSON object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityRecord {
    /// Create a record with no attributes.
    ///
    /// # Example
    ///
    /// ```
    /// use search_sync_shared::EntityRecord;
    /// use serde_json::json;
    ///
    /// let record = EntityRecord::new("article", "42")
    ///     .with_attribute("title", json!("Hello"))
    ///     .with_attribute("published", json!(true));
    /// assert_eq!(record.attribute("title"), Some(&json!("Hello")));
    /// ```
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            attributes: Map::new(),
        }
    }

    /// Create a record from an existing attribute map.
    pub fn with_attributes(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            attributes,
        }
    }

    /// Set a single attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Evaluate an attribute as a boolean accessor.
    ///
    /// Missing attributes, `null` and `false` are false; every other value is true.
    pub fn attribute_truthy(&self, name: &str) -> bool {
        !matches!(
            self.attributes.get(name),
            None | Some(Value::Null) | Some(Value::Bool(false))
        )
    }
}

/// Document ready to be written to the search index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable document id within the index.
    pub id: String,
    /// Document body.
    pub body: Map<String, Value>,
}

impl Document {
    /// Create a document with the given id and body.
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }

    /// Generate the stable document id for an entity.
    ///
    /// The id combines document type and entity id so that several entity types can
    /// share one index without colliding.
    pub fn document_id(document_type: &str, entity_id: &str) -> String {
        format!("{}_{}", document_type, entity_id)
    }

    /// Consume the document and return its body as a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_record_new() {
        let record = EntityRecord::new("article", "42");

        assert_eq!(record.entity_type, "article");
        assert_eq!(record.entity_id, "42");
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn test_attribute_truthy() {
        let record = EntityRecord::new("article", "1")
            .with_attribute("published", json!(true))
            .with_attribute("draft", json!(false))
            .with_attribute("deleted_at", json!(null))
            .with_attribute("views", json!(0))
            .with_attribute("slug", json!(""));

        assert!(record.attribute_truthy("published"));
        assert!(!record.attribute_truthy("draft"));
        assert!(!record.attribute_truthy("deleted_at"));
        assert!(!record.attribute_truthy("missing"));
        // Only null and false are falsy
        assert!(record.attribute_truthy("views"));
        assert!(record.attribute_truthy("slug"));
    }

    #[test]
    fn test_document_id() {
        assert_eq!(Document::document_id("articles", "42"), "articles_42");
    }

    #[test]
    fn test_entity_record_deserializes_without_attributes() {
        let record: EntityRecord =
            serde_json::from_str(r#"{"entity_type":"user","entity_id":"9"}"#).unwrap();
        assert!(record.attributes.is_empty());
    }
}
