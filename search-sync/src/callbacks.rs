//! Post-index callback dispatch.
//!
//! Handlers are registered against `(entity_type, change_kind)` and run synchronously by
//! the worker right after a successful engine call, in registration order. A failing or
//! panicking handler is logged and reported on the callback-error channel; the operation
//! it fired for still succeeds.

use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use search_sync_repository::WriteResult;
use search_sync_shared::{ChangeKind, EntityRecord, PercolationMatch};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::CallbackError;

/// Result returned by callback handlers.
pub type HandlerResult = Result<(), Box<dyn StdError + Send + Sync>>;

type IndexedHandler = Arc<dyn Fn(&IndexedEvent) -> HandlerResult + Send + Sync>;
type PercolatedHandler = Arc<dyn Fn(&PercolationMatch) -> HandlerResult + Send + Sync>;

/// A successfully applied operation, as seen by `on_indexed` handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEvent {
    pub operation_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub change_kind: ChangeKind,
    pub index_name: String,
    pub document_id: String,
    /// Write result reported by the engine; `None` for deletes.
    pub result: Option<WriteResult>,
    /// Entity snapshot that was indexed; `None` for deletes.
    pub entity: Option<EntityRecord>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KindFilter {
    Exactly(ChangeKind),
    AnyWrite,
}

impl KindFilter {
    fn matches(&self, change_kind: ChangeKind) -> bool {
        match self {
            KindFilter::Exactly(kind) => *kind == change_kind,
            KindFilter::AnyWrite => change_kind.is_write(),
        }
    }
}

struct IndexedRegistration {
    entity_type: String,
    kind: KindFilter,
    handler: IndexedHandler,
}

struct PercolatedRegistration {
    entity_type: String,
    handler: PercolatedHandler,
}

/// Registry and dispatcher of post-index callbacks.
pub struct CallbackDispatcher {
    indexed: Vec<IndexedRegistration>,
    percolated: Vec<PercolatedRegistration>,
    errors: mpsc::UnboundedSender<CallbackError>,
}

impl CallbackDispatcher {
    /// Create a dispatcher and the receiving end of its callback-error channel.
    ///
    /// The receiver may be dropped; errors are still logged.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallbackError>) {
        let (errors, receiver) = mpsc::unbounded_channel();
        (
            Self {
                indexed: Vec::new(),
                percolated: Vec::new(),
                errors,
            },
            receiver,
        )
    }

    /// Run `handler` after a `change_kind` operation on `entity_type` succeeds.
    pub fn on_indexed<F>(
        &mut self,
        entity_type: impl Into<String>,
        change_kind: ChangeKind,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&IndexedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.indexed.push(IndexedRegistration {
            entity_type: entity_type.into(),
            kind: KindFilter::Exactly(change_kind),
            handler: Arc::new(handler),
        });
        self
    }

    /// Run `handler` after every successful create or update of `entity_type`.
    pub fn on_any_indexed<F>(&mut self, entity_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&IndexedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.indexed.push(IndexedRegistration {
            entity_type: entity_type.into(),
            kind: KindFilter::AnyWrite,
            handler: Arc::new(handler),
        });
        self
    }

    /// Run `handler` when a written `entity_type` document matches stored queries.
    pub fn on_percolated<F>(&mut self, entity_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&PercolationMatch) -> HandlerResult + Send + Sync + 'static,
    {
        self.percolated.push(PercolatedRegistration {
            entity_type: entity_type.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Fire `on_indexed` handlers matching the event.
    pub fn dispatch_indexed(&self, event: &IndexedEvent) -> Vec<CallbackError> {
        let mut failures = Vec::new();
        let matching = self.indexed.iter().filter(|registration| {
            registration.entity_type == event.entity_type
                && registration.kind.matches(event.change_kind)
        });

        for (handler_index, registration) in matching.enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.handler)(event)));
            if let Some(failure) = self.check(
                "on_indexed",
                handler_index,
                event.operation_id,
                &event.entity_type,
                &event.entity_id,
                outcome,
            ) {
                failures.push(failure);
            }
        }
        failures
    }

    /// Fire `on_percolated` handlers. Nothing runs for an empty match set.
    pub fn dispatch_percolated(&self, matched: &PercolationMatch) -> Vec<CallbackError> {
        if matched.matched_rule_ids.is_empty() {
            return Vec::new();
        }

        let mut failures = Vec::new();
        let matching = self
            .percolated
            .iter()
            .filter(|registration| registration.entity_type == matched.entity_type);

        for (handler_index, registration) in matching.enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.handler)(matched)));
            if let Some(failure) = self.check(
                "on_percolated",
                handler_index,
                matched.operation_id,
                &matched.entity_type,
                &matched.entity_id,
                outcome,
            ) {
                failures.push(failure);
            }
        }
        failures
    }

    pub fn has_percolate_handlers(&self, entity_type: &str) -> bool {
        self.percolated
            .iter()
            .any(|registration| registration.entity_type == entity_type)
    }

    fn check(
        &self,
        hook: &'static str,
        handler_index: usize,
        operation_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        outcome: std::thread::Result<HandlerResult>,
    ) -> Option<CallbackError> {
        let (message, panicked) = match outcome {
            Ok(Ok(())) => {
                debug!(hook, handler_index, %operation_id, "Callback handler completed");
                return None;
            }
            Ok(Err(e)) => (e.to_string(), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };

        let failure = CallbackError {
            hook,
            handler_index,
            operation_id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            message,
            panicked,
        };

        error!(
            hook,
            handler_index,
            operation_id = %operation_id,
            entity_type = %entity_type,
            entity_id = %entity_id,
            panicked,
            error = %failure.message,
            "Callback handler failed"
        );
        // the receiver is optional
        let _ = self.errors.send(failure.clone());

        Some(failure)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
