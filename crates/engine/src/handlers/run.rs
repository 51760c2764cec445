//! `run`: call a function with the node's context.
//!
//! ```ignore
//! fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
//!     ActionMap::new().run(|args| async move {
//!         start_process(args.properties).await?;
//!         Ok(())
//!     })
//! }
//! ```

use crate::dispatcher::Handler;
use async_trait::async_trait;
use canopy_core::{
    Action, ActionMap, ContextRef, EngineError, ResolvedProperties, Result, RunArgs, UpdaterRef, RUN,
};
use std::sync::Arc;

/// Invokes the `run` action, if present, and waits for it.
#[derive(Debug, Default)]
pub struct RunHandler;

#[async_trait]
impl Handler for RunHandler {
    fn name(&self) -> &str {
        RUN
    }

    async fn handle(
        &self,
        actions: &ActionMap,
        context: &ContextRef,
        properties: &ResolvedProperties,
        updater: &UpdaterRef,
    ) -> Result<()> {
        let Some(action) = actions.get(RUN) else {
            return Ok(());
        };

        let Action::Run(f) = action else {
            return Err(EngineError::handler(
                RUN,
                anyhow::anyhow!("expected a function, got {action:?}"),
            ));
        };

        let args = RunArgs {
            context: Arc::clone(context),
            properties: properties.clone(),
            updater: Arc::clone(updater),
        };
        f(args).await.map_err(|e| EngineError::handler(RUN, e))
    }
}
