//! The view of a live tree handed to lifecycle hooks.

use crate::action::ActionMap;
use crate::context::ContextRef;
use crate::descriptor::DescriptorRef;
use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Shared handle to a session.
pub type SessionRef = Arc<dyn Session>;

/// Access to the expanded tree a descriptor is executing in.
pub trait Session: Send + Sync {
    /// Descriptor occupying node `id`.
    fn descriptor(&self, id: &str) -> Option<DescriptorRef>;

    /// Context of node `id`.
    fn context(&self, id: &str) -> Option<ContextRef>;

    /// Ids of the producer nodes whose resolved values feed the
    /// properties owner at `owner_id`, in property index order.
    fn producer_ids(&self, owner_id: &str) -> Vec<String>;

    /// Execute one action map against node `id` outside the transition flow.
    fn call_command(&self, id: &str, actions: ActionMap) -> BoxFuture<'static, Result<()>>;
}
