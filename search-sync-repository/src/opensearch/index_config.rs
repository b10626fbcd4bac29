//! OpenSearch index definitions.
//!
//! An [`IndexDefinition`] is built per entity type from its `index_options` (engine
//! settings such as analyzers and tokenizers) and `mapping` (field-level overrides).

use serde_json::{json, Map, Value};

/// The default index used when an entity type does not name one.
pub const DEFAULT_INDEX_NAME: &str = "search_sync";

/// Field holding the document type of every indexed document.
pub const DOCUMENT_TYPE_FIELD: &str = "document_type";

/// Field holding the time a document was written.
pub const INDEXED_AT_FIELD: &str = "indexed_at";

/// Field holding stored percolator queries.
pub const PERCOLATOR_FIELD: &str = "query";

/// Settings and mappings for one search index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// The index name.
    pub index_name: String,
    /// Engine-specific index settings (`index_options`).
    pub settings: Map<String, Value>,
    /// Field mappings merged over the defaults.
    pub properties: Map<String, Value>,
    /// Whether the index stores percolator queries.
    pub percolator: bool,
}

impl IndexDefinition {
    /// Create a definition with the default settings and mappings.
    ///
    /// # Arguments
    ///
    /// * `index_name` - The index name
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            settings: default_settings(),
            properties: default_properties(),
            percolator: false,
        }
    }

    /// Merge engine-specific settings over the defaults.
    ///
    /// Non-object values are ignored.
    pub fn with_settings(mut self, index_options: &Value) -> Self {
        if let Value::Object(options) = index_options {
            for (key, value) in options {
                self.settings.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Merge field mapping overrides over the defaults.
    ///
    /// Accepts either a bare `{"field": {...}}` map or a `{"properties": {...}}` wrapper.
    pub fn with_mapping(mut self, mapping: &Value) -> Self {
        let fields = match mapping.get("properties") {
            Some(Value::Object(properties)) => Some(properties),
            _ => mapping.as_object(),
        };
        if let Some(fields) = fields {
            for (field, definition) in fields {
                self.properties.insert(field.clone(), definition.clone());
            }
        }
        self
    }

    /// Add a percolator field so stored queries can be matched against documents.
    pub fn with_percolator(mut self) -> Self {
        self.percolator = true;
        self.properties
            .insert(PERCOLATOR_FIELD.to_string(), json!({ "type": "percolator" }));
        self
    }

    /// The request body for index creation.
    pub fn body(&self) -> Value {
        json!({
            "settings": self.settings,
            "mappings": {
                "properties": self.properties
            }
        })
    }
}

fn default_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("number_of_shards".to_string(), json!(1));
    settings.insert("number_of_replicas".to_string(), json!(1));
    settings
}

fn default_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(DOCUMENT_TYPE_FIELD.to_string(), json!({ "type": "keyword" }));
    properties.insert(INDEXED_AT_FIELD.to_string(), json!({ "type": "date" }));
    properties
}

/// Build the percolate query for a document.
pub fn percolate_query(document: &Value) -> Value {
    json!({
        "_source": false,
        "size": 1000,
        "query": {
            "percolate": {
                "field": PERCOLATOR_FIELD,
                "document": document
            }
        }
    })
}
