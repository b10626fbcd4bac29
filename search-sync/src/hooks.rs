//! Commit hooks used by the host persistence layer.
//!
//! Hosts call [`SyncHooks::on_commit`] strictly after a transaction commits. The hook
//! evaluates eligibility and enqueues an operation; it never waits on the search engine.
//! Errors are returned to the caller and must not roll back the committed transaction.

use std::sync::Arc;

use search_sync_shared::{ChangeEvent, ChangeKind, EntityRecord, IndexOperation};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EntityRegistry;
use crate::errors::SyncError;
use crate::queue::IndexSyncQueue;

/// Producer-side entry point of the pipeline.
#[derive(Clone)]
pub struct SyncHooks {
    registry: Arc<EntityRegistry>,
    queue: Arc<IndexSyncQueue>,
}

impl SyncHooks {
    pub fn new(registry: Arc<EntityRegistry>, queue: Arc<IndexSyncQueue>) -> Self {
        Self { registry, queue }
    }

    /// Record a committed change of `entity`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(operation_id))` - The change was queued
    /// * `Ok(None)` - The entity is not eligible for indexing
    /// * `Err(SyncError)` - Unknown entity type, saturated or closed queue
    pub fn on_commit(
        &self,
        entity: &EntityRecord,
        change_kind: ChangeKind,
    ) -> Result<Option<Uuid>, SyncError> {
        let event = ChangeEvent::new(
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            change_kind,
        );
        self.on_change(event, Some(entity))
    }

    /// Record a change event produced by the host.
    ///
    /// Creates and updates need the entity snapshot; deletes only need the event.
    pub fn on_change(
        &self,
        event: ChangeEvent,
        entity: Option<&EntityRecord>,
    ) -> Result<Option<Uuid>, SyncError> {
        let config = self
            .registry
            .get(&event.entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(event.entity_type.clone()))?;

        let payload = match (event.change_kind, entity) {
            (ChangeKind::Delete, _) => None,
            (_, Some(entity)) => {
                if !config.eligibility.should_index(entity, event.change_kind) {
                    debug!(
                        entity_type = %event.entity_type,
                        entity_id = %event.entity_id,
                        change_kind = %event.change_kind,
                        "Entity not eligible for indexing"
                    );
                    return Ok(None);
                }
                Some(entity.clone())
            }
            (kind, None) => {
                return Err(SyncError::terminal(format!(
                    "{} of {}/{} requires an entity snapshot",
                    kind, event.entity_type, event.entity_id
                )))
            }
        };

        let entity_type = event.entity_type.clone();
        let entity_id = event.entity_id.clone();
        let op = IndexOperation::from_event(event, payload);

        self.queue.enqueue(op).map(Some).map_err(|e| {
            warn!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                error = %e,
                "Failed to enqueue index operation"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityTypeConfig, QueueConfig};
    use crate::dead_letter::MemoryDeadLetterSink;
    use crate::eligibility::Predicate;
    use serde_json::json;

    fn hooks(capacity: usize) -> (SyncHooks, Arc<IndexSyncQueue>) {
        let registry = EntityRegistry::default().register(
            EntityTypeConfig::new("article")
                .only_if(Predicate::attribute("published"))
                .unless(Predicate::attribute("spam")),
        );
        let queue = Arc::new(IndexSyncQueue::new(
            QueueConfig {
                capacity,
                ..QueueConfig::default()
            },
            Arc::new(MemoryDeadLetterSink::new()),
        ));
        (SyncHooks::new(Arc::new(registry), queue.clone()), queue)
    }

    fn article(id: &str, published: bool, spam: bool) -> EntityRecord {
        EntityRecord::new("article", id)
            .with_attribute("published", json!(published))
            .with_attribute("spam", json!(spam))
    }

    #[tokio::test]
    async fn test_on_commit_enqueues_eligible_changes() {
        let (hooks, queue) = hooks(10);

        let id = hooks
            .on_commit(&article("1", true, false), ChangeKind::Create)
            .unwrap();
        assert!(id.is_some());

        let op = queue.try_dequeue().await.unwrap();
        assert_eq!(Some(op.operation_id), id);
        assert_eq!(op.payload.unwrap().attribute("published"), Some(&json!(true)));
    }

    #[test]
    fn test_on_commit_filters_ineligible_changes() {
        let (hooks, queue) = hooks(10);

        assert_eq!(
            hooks
                .on_commit(&article("1", false, false), ChangeKind::Create)
                .unwrap(),
            None
        );
        assert_eq!(
            hooks
                .on_commit(&article("2", true, true), ChangeKind::Update)
                .unwrap(),
            None
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delete_bypasses_eligibility() {
        let (hooks, queue) = hooks(10);

        let id = hooks
            .on_commit(&article("1", false, true), ChangeKind::Delete)
            .unwrap();
        assert!(id.is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_on_change_delete_without_entity() {
        let (hooks, queue) = hooks(10);

        let event = ChangeEvent::new("article", "1", ChangeKind::Delete).with_version_token("v3");
        assert!(hooks.on_change(event, None).unwrap().is_some());
        assert_eq!(queue.len(), 1);

        let update = ChangeEvent::new("article", "1", ChangeKind::Update);
        assert!(matches!(
            hooks.on_change(update, None),
            Err(SyncError::Terminal(_))
        ));
    }

    #[test]
    fn test_errors_surface_to_the_caller() {
        let (hooks, _queue) = hooks(1);

        hooks
            .on_commit(&article("1", true, false), ChangeKind::Create)
            .unwrap();
        assert!(matches!(
            hooks.on_commit(&article("2", true, false), ChangeKind::Create),
            Err(SyncError::QueueSaturated { capacity: 1 })
        ));

        let comment = EntityRecord::new("comment", "1");
        assert!(matches!(
            hooks.on_commit(&comment, ChangeKind::Create),
            Err(SyncError::UnknownEntityType(_))
        ));
    }
}
