//! Action-pipeline dispatcher: applies every registered handler to an action map.

use async_trait::async_trait;
use canopy_core::{ActionMap, ContextRef, ResolvedProperties, Result, UpdaterRef};
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// One entry of the action vocabulary.
///
/// Every handler sees every action map and decides for itself whether
/// there is a key it understands.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler name, normally the action key it consumes.
    fn name(&self) -> &str;

    /// Apply this handler to `actions`.
    async fn handle(
        &self,
        actions: &ActionMap,
        context: &ContextRef,
        properties: &ResolvedProperties,
        updater: &UpdaterRef,
    ) -> Result<()>;
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Ordered, append-only list of handlers.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Vec<HandlerRef>,
}

impl Dispatcher {
    /// Create a dispatcher with `handlers`.
    pub fn new(handlers: Vec<HandlerRef>) -> Self {
        Self { handlers }
    }

    /// Append handlers.
    pub fn use_handlers(&mut self, handlers: impl IntoIterator<Item = HandlerRef>) {
        self.handlers.extend(handlers);
    }

    /// Registered handler names, in order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run every handler concurrently and wait for all of them.
    ///
    /// Fails with the error of the first failing handler in registration order.
    pub async fn dispatch(
        &self,
        actions: &ActionMap,
        context: &ContextRef,
        properties: &ResolvedProperties,
        updater: &UpdaterRef,
    ) -> Result<()> {
        debug!(
            "Dispatching [{}] for {}",
            actions.names().collect::<Vec<_>>().join(", "),
            context.id()
        );
        let outcomes = join_all(
            self.handlers
                .iter()
                .map(|handler| handler.handle(actions, context, properties, updater)),
        )
        .await;
        outcomes.into_iter().collect()
    }
}
