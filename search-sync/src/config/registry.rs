//! Per entity type configuration.

use std::collections::{BTreeMap, HashMap};

use search_sync_repository::opensearch::DEFAULT_INDEX_NAME;
use search_sync_repository::IndexDefinition;
use serde_json::Value;

use crate::eligibility::{EligibilityFilter, Predicate};
use crate::mapper::MapperOptions;

/// How one entity type is synchronized.
#[derive(Debug, Clone)]
pub struct EntityTypeConfig {
    pub entity_type: String,
    /// Destination index; the registry default when `None`.
    pub index_name: Option<String>,
    /// Document type stored with every document; defaults to the entity type.
    pub document_type: String,
    /// Engine-specific index settings (analyzers, tokenizers, shards).
    pub index_options: Value,
    /// Field-level mapping overrides.
    pub mapping: Value,
    pub eligibility: EligibilityFilter,
    pub mapper_options: MapperOptions,
    /// Run stored percolator queries against every written document.
    pub percolate: bool,
}

impl EntityTypeConfig {
    pub fn new(entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            document_type: entity_type.clone(),
            entity_type,
            index_name: None,
            index_options: Value::Null,
            mapping: Value::Null,
            eligibility: EligibilityFilter::always(),
            mapper_options: MapperOptions::default(),
            percolate: false,
        }
    }

    pub fn index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = document_type.into();
        self
    }

    pub fn index_options(mut self, index_options: Value) -> Self {
        self.index_options = index_options;
        self
    }

    pub fn mapping(mut self, mapping: Value) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn only_if(mut self, predicate: Predicate) -> Self {
        self.eligibility = self.eligibility.only_if(predicate);
        self
    }

    pub fn unless(mut self, predicate: Predicate) -> Self {
        self.eligibility = self.eligibility.unless(predicate);
        self
    }

    pub fn mapper_options(mut self, options: MapperOptions) -> Self {
        self.mapper_options = options;
        self
    }

    pub fn percolate(mut self) -> Self {
        self.percolate = true;
        self
    }

    pub fn index_name(&self) -> &str {
        self.index_name.as_deref().unwrap_or(DEFAULT_INDEX_NAME)
    }
}

/// Explicit configuration of every synchronized entity type, passed at startup.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    default_index: String,
    types: HashMap<String, EntityTypeConfig>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_NAME)
    }
}

impl EntityRegistry {
    pub fn new(default_index: impl Into<String>) -> Self {
        Self {
            default_index: default_index.into(),
            types: HashMap::new(),
        }
    }

    /// Register an entity type, replacing any previous configuration for it.
    pub fn register(mut self, mut config: EntityTypeConfig) -> Self {
        if config.index_name.is_none() {
            config.index_name = Some(self.default_index.clone());
        }
        self.types.insert(config.entity_type.clone(), config);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityTypeConfig> {
        self.types.get(entity_type)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// One definition per destination index, merging the settings and mappings of
    /// every entity type that writes to it.
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        let mut by_index: BTreeMap<&str, Vec<&EntityTypeConfig>> = BTreeMap::new();
        for config in self.types.values() {
            by_index.entry(config.index_name()).or_default().push(config);
        }

        by_index
            .into_iter()
            .map(|(index_name, mut configs)| {
                configs.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
                configs.into_iter().fold(
                    IndexDefinition::new(index_name),
                    |definition, config| {
                        let definition = definition
                            .with_settings(&config.index_options)
                            .with_mapping(&config.mapping);
                        if config.percolate {
                            definition.with_percolator()
                        } else {
                            definition
                        }
                    },
                )
            })
            .collect()
    }
}
