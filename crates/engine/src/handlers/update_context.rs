//! `updateContext`: merge values into the node's context.
//!
//! The action is either a literal JSON object or a function of
//! `(context, properties)` returning a [`PendingUpdate`] whose leaves may
//! still be futures. All leaves are awaited before the single merge.

use crate::dispatcher::Handler;
use async_trait::async_trait;
use canopy_core::{
    Action, ActionMap, ContextRef, ContextUpdate, EngineError, Pending, PendingUpdate,
    ResolvedProperties, Result, UpdaterRef, UPDATE_CONTEXT,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

/// Resolves the `updateContext` action, if present, and applies it.
#[derive(Debug, Default)]
pub struct UpdateContextHandler;

#[async_trait]
impl Handler for UpdateContextHandler {
    fn name(&self) -> &str {
        UPDATE_CONTEXT
    }

    async fn handle(
        &self,
        actions: &ActionMap,
        context: &ContextRef,
        properties: &ResolvedProperties,
        updater: &UpdaterRef,
    ) -> Result<()> {
        let Some(action) = actions.get(UPDATE_CONTEXT) else {
            return Ok(());
        };

        let update = match action {
            Action::Value(value) => literal_update(value)?,
            Action::Deferred(f) => literal_update(&f(context.as_ref())?)?,
            Action::Update(f) => {
                let pending = f(context.as_ref(), properties).map_err(|e| EngineError::handler(UPDATE_CONTEXT, e))?;
                resolve_update(pending)
                    .await
                    .map_err(|e| EngineError::handler(UPDATE_CONTEXT, e))?
            }
            Action::Run(_) => {
                return Err(EngineError::handler(
                    UPDATE_CONTEXT,
                    anyhow::anyhow!("expected an object or an update function"),
                ))
            }
        };

        updater.update(context, update);
        Ok(())
    }
}

fn literal_update(value: &Value) -> Result<ContextUpdate> {
    match value {
        Value::Object(map) => Ok(ContextUpdate::from(map.clone())),
        other => Err(EngineError::handler(
            UPDATE_CONTEXT,
            anyhow::anyhow!("expected an object, got {other}"),
        )),
    }
}

async fn resolve_update(pending: PendingUpdate) -> anyhow::Result<ContextUpdate> {
    let mut update = ContextUpdate::new();
    for (key, leaf) in pending {
        update = match leaf {
            Pending::Unset => update.unset(key),
            other => update.set(key, resolve_leaf(other).await?),
        };
    }
    Ok(update)
}

fn resolve_leaf(leaf: Pending) -> BoxFuture<'static, anyhow::Result<Value>> {
    async move {
        match leaf {
            Pending::Ready(value) => Ok(value),
            Pending::Deferred(future) => future.await,
            Pending::Unset => Ok(Value::Null),
            Pending::Object(entries) => {
                let mut object = Map::new();
                for (key, leaf) in entries {
                    // nested removals just drop the key
                    if matches!(leaf, Pending::Unset) {
                        continue;
                    }
                    object.insert(key, resolve_leaf(leaf).await?);
                }
                Ok(Value::Object(object))
            }
        }
    }
    .boxed()
}
