//! Document mapping from entity snapshots to search documents.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use search_sync_shared::{Document, EntityRecord};
use serde_json::{Map, Value};

use crate::errors::SyncError;

/// Converts an entity into the document stored in the search index.
pub trait DocumentMapper: Send + Sync {
    /// Build the document for `entity`.
    ///
    /// The returned document's `id` is the entity id; the worker derives the stable
    /// index document id from it and the document type.
    fn to_document(&self, entity: &EntityRecord, options: &MapperOptions)
        -> Result<Document, SyncError>;
}

/// A field whose value is derived from the whole entity.
#[derive(Clone)]
pub struct ComputedField {
    pub name: String,
    compute: Arc<dyn Fn(&EntityRecord) -> Value + Send + Sync>,
}

impl ComputedField {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&EntityRecord) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn compute(&self, entity: &EntityRecord) -> Value {
        (self.compute)(entity)
    }
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Options shaping the mapped document.
#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    /// When set, only these attributes are kept.
    pub field_inclusion_list: Option<BTreeSet<String>>,
    /// Attributes that are always dropped.
    pub field_exclusion_list: BTreeSet<String>,
    /// Fields added after filtering; they override attributes of the same name.
    pub computed_fields: Vec<ComputedField>,
    /// How many levels of nested objects are kept. `None` keeps everything.
    pub nested_object_expansion_depth: Option<usize>,
}

impl MapperOptions {
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_inclusion_list = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn except<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_exclusion_list
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn computed(mut self, field: ComputedField) -> Self {
        self.computed_fields.push(field);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.nested_object_expansion_depth = Some(depth);
        self
    }

    fn keeps(&self, field: &str) -> bool {
        let included = self
            .field_inclusion_list
            .as_ref()
            .map_or(true, |fields| fields.contains(field));
        included && !self.field_exclusion_list.contains(field)
    }
}

/// Default mapper: copies entity attributes into a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentMapper;

impl DocumentMapper for JsonDocumentMapper {
    fn to_document(
        &self,
        entity: &EntityRecord,
        options: &MapperOptions,
    ) -> Result<Document, SyncError> {
        let mut body = Map::new();

        for (field, value) in &entity.attributes {
            if !options.keeps(field) {
                continue;
            }
            let value = match options.nested_object_expansion_depth {
                Some(depth) => match truncate(value, depth) {
                    Some(value) => value,
                    None => continue,
                },
                None => value.clone(),
            };
            body.insert(field.clone(), value);
        }

        for field in &options.computed_fields {
            body.insert(field.name.clone(), field.compute(entity));
        }

        Ok(Document::new(entity.entity_id.clone(), body))
    }
}

/// Drop objects nested deeper than `depth` levels below the top-level attributes.
fn truncate(value: &Value, depth: usize) -> Option<Value> {
    match value {
        Value::Object(map) => {
            if depth == 0 {
                return None;
            }
            let nested = map
                .iter()
                .filter_map(|(k, v)| truncate(v, depth - 1).map(|v| (k.clone(), v)))
                .collect();
            Some(Value::Object(nested))
        }
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(|item| truncate(item, depth)).collect(),
        )),
        scalar => Some(scalar.clone()),
    }
}
