//! Command tree and the per-node call-order state machine.

use crate::dispatcher::Dispatcher;
use canopy_core::{
    resolve_properties, ActionMap, CallOrder, ContextRef, ContextUpdate, EngineError, Properties,
    ResolvedProperties, Result, UpdaterRef,
};
use futures::future::{join, join_all, BoxFuture};
use futures::FutureExt;
use tracing::debug;

/// One node's actions for a single transition, paired with its context.
///
/// Built fresh for every transition and discarded afterwards.
pub struct CommandNode {
    /// Actions returned by the node's lifecycle hook
    pub actions: ActionMap,
    /// The node's context
    pub context: ContextRef,
    /// Unresolved properties; accessors run at execution time
    pub properties: Properties,
    /// Node id
    pub id: String,
    /// Children in tree order
    pub children: Vec<CommandNode>,
    record_state: bool,
}

impl CommandNode {
    /// Create a node whose outcome is recorded into `context.state`.
    pub fn new(
        actions: ActionMap,
        context: ContextRef,
        properties: Properties,
        id: impl Into<String>,
        children: Vec<CommandNode>,
    ) -> Self {
        Self {
            actions,
            context,
            properties,
            id: id.into(),
            children,
            record_state: true,
        }
    }

    /// Create a childless node for an out-of-band command.
    ///
    /// Its outcome leaves `context.state` untouched.
    pub fn out_of_band(
        actions: ActionMap,
        context: ContextRef,
        properties: Properties,
        id: impl Into<String>,
    ) -> Self {
        Self {
            record_state: false,
            ..Self::new(actions, context, properties, id, Vec::new())
        }
    }

    /// Number of nodes in this command tree.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(CommandNode::len).sum::<usize>()
    }

    /// Always false; a command tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Resolve accessors in the properties against this node's context.
    pub fn resolved_properties(&self) -> Result<ResolvedProperties> {
        resolve_properties(&self.properties, &self.context)
    }

    /// Execute this node and its children according to the `callOrder` entry.
    ///
    /// - `Parallel` (default): own actions and every child concurrently
    /// - `SelfThenChildren`: own actions, then children concurrently
    /// - `PropertiesMode`: own actions, then all children but the last
    ///   concurrently, then the last child
    ///
    /// Under `Parallel` nothing is cancelled when one branch fails; the
    /// result reports the first failure in tree order once all have finished.
    pub fn call<'a>(
        &'a self,
        transition: &'a str,
        dispatcher: &'a Dispatcher,
        updater: &'a UpdaterRef,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let order = match self.actions.order() {
                Ok(order) => order,
                Err(err) => return Err(self.fail(transition, err, updater)),
            };

            let call_all = |children: &'a [CommandNode]| {
                join_all(children.iter().map(|c| c.call(transition, dispatcher, updater)))
            };

            match order {
                CallOrder::Parallel => {
                    let (own, children) =
                        join(self.execute(transition, dispatcher, updater), call_all(&self.children)).await;
                    own?;
                    first_error(children)
                }
                CallOrder::SelfThenChildren => {
                    self.execute(transition, dispatcher, updater).await?;
                    first_error(call_all(&self.children).await)
                }
                CallOrder::PropertiesMode => {
                    self.execute(transition, dispatcher, updater).await?;
                    let Some((last, producers)) = self.children.split_last() else {
                        return Ok(());
                    };
                    first_error(call_all(producers).await)?;
                    last.call(transition, dispatcher, updater).await
                }
            }
        }
        .boxed()
    }

    /// Execute this node's own actions through the dispatcher.
    ///
    /// Success records `{state: {<transition>: true}}`; failure records
    /// `{state: {<transition>: false, error}}` and returns the error
    /// annotated with this node's id.
    pub async fn execute(&self, transition: &str, dispatcher: &Dispatcher, updater: &UpdaterRef) -> Result<()> {
        debug!("Executing {} for node {}", transition, self.id);

        let outcome = match self.resolved_properties() {
            Ok(properties) => {
                dispatcher
                    .dispatch(&self.actions, &self.context, &properties, updater)
                    .await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                if self.record_state {
                    updater.update(&self.context, ContextUpdate::state(transition, None));
                }
                Ok(())
            }
            Err(err) => Err(self.fail(transition, err, updater)),
        }
    }

    fn fail(&self, transition: &str, err: EngineError, updater: &UpdaterRef) -> EngineError {
        let err = err.at_node(self.id.clone());
        debug!("Node {} failed {}: {}", self.id, transition, err);
        if self.record_state {
            updater.update(&self.context, ContextUpdate::state(transition, Some(err.to_string())));
        }
        err
    }
}

fn first_error(outcomes: Vec<Result<()>>) -> Result<()> {
    outcomes.into_iter().collect()
}
