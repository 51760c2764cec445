//! Layers bundle handlers and kinds so they can be registered together.

use crate::dispatcher::HandlerRef;
use crate::handlers::{RunHandler, UpdateContextHandler};
use canopy_core::KindRef;
use std::sync::Arc;

/// A bundle of handlers and resource kinds.
#[derive(Clone, Default)]
pub struct Layer {
    /// Handlers appended to the dispatcher
    pub handlers: Vec<HandlerRef>,
    /// Kinds registered by name
    pub kinds: Vec<KindRef>,
}

impl Layer {
    /// Create an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler.
    pub fn with_handler(mut self, handler: HandlerRef) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Add a kind.
    pub fn with_kind(mut self, kind: KindRef) -> Self {
        self.kinds.push(kind);
        self
    }
}

/// The minimal vocabulary: `updateContext` and `run`.
pub fn core_layer() -> Layer {
    Layer::new()
        .with_handler(Arc::new(UpdateContextHandler))
        .with_handler(Arc::new(RunHandler))
}
