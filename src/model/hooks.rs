//! Lifecycle Hook Registry
//!
//! Maps lifecycle events to async handlers. `Before*` handlers can veto the operation by
//! returning an error; every other handler runs after the write is durable and failures are
//! only logged.

use crate::document::types::Document;
use crate::error::{OdmError, Result};

use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    /// Any successful write to the primary document.
    StorageUpdated,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeCreate => "before_create",
            HookEvent::AfterCreate => "after_create",
            HookEvent::BeforeUpdate => "before_update",
            HookEvent::AfterUpdate => "after_update",
            HookEvent::BeforeDelete => "before_delete",
            HookEvent::AfterDelete => "after_delete",
            HookEvent::StorageUpdated => "storage_updated",
        }
    }

    pub fn is_before(&self) -> bool {
        matches!(
            self,
            HookEvent::BeforeCreate | HookEvent::BeforeUpdate | HookEvent::BeforeDelete
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler sees: the model, the document identity, and the stored state around the
/// write (`before` is `None` on create, `after` is `None` on delete).
#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub model: String,
    pub identity: Document,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// Type-erased async handler.
pub type HookFn =
    Arc<dyn Fn(HookContext) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

pub struct HookRegistry {
    handlers: DashMap<HookEvent, Vec<HookFn>>,
}

impl HookRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    /// Handlers for one event run in registration order.
    pub fn register<F, Fut>(&self, event: HookEvent, handler: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler_fn: HookFn = Arc::new(move |ctx: HookContext| {
            Box::pin(handler(ctx)) as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        });
        self.handlers.entry(event).or_default().push(handler_fn);
        tracing::debug!("Registered {} hook", event);
    }

    pub fn has_handlers(&self, event: HookEvent) -> bool {
        self.handler_count(event) > 0
    }

    pub fn handler_count(&self, event: HookEvent) -> usize {
        self.handlers.get(&event).map_or(0, |list| list.len())
    }

    pub async fn fire(&self, ctx: HookContext) -> Result<()> {
        // Clone out so no map guard is held across an await.
        let handlers: Vec<HookFn> = match self.handlers.get(&ctx.event) {
            Some(list) => list.clone(),
            None => return Ok(()),
        };
        let event = ctx.event;
        for handler in handlers {
            if let Err(e) = handler(ctx.clone()).await {
                if event.is_before() {
                    return Err(OdmError::Hook {
                        event: event.to_string(),
                        source: e,
                    });
                }
                tracing::warn!("{} hook on {} failed: {}", event, ctx.model, e);
            }
        }
        Ok(())
    }
}
