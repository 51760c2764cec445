//! `spawn`: run an external process for a node.

use crate::kinds::ENV;
use async_trait::async_trait;
use canopy_core::{
    Action, ActionMap, ContextRef, ContextUpdate, EngineError, ResolvedProperties, Result, UpdaterRef,
};
use canopy_engine::Handler;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Handler name and action key.
pub const SPAWN: &str = "spawn";

/// What to run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpawnRequest {
    /// Program to execute
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Runs the process described by the `spawn` action, or by the node's
/// properties when the action is just `true`.
///
/// Records `exit_code` and `stdout` into the node's context and fails on a
/// non-zero exit.
#[derive(Debug, Default)]
pub struct SpawnHandler;

#[async_trait]
impl Handler for SpawnHandler {
    fn name(&self) -> &str {
        SPAWN
    }

    async fn handle(
        &self,
        actions: &ActionMap,
        context: &ContextRef,
        properties: &ResolvedProperties,
        updater: &UpdaterRef,
    ) -> Result<()> {
        let Some(action) = actions.get(SPAWN) else {
            return Ok(());
        };

        let raw = match action {
            Action::Value(Value::Object(raw)) => Value::Object(raw.clone()),
            Action::Value(_) => Value::Object(properties.clone()),
            other => match other.evaluate(context) {
                Some(value) => value?,
                None => return Err(failure(anyhow::anyhow!("expected a literal or deferred value"))),
            },
        };
        let request: SpawnRequest = serde_json::from_value(raw).map_err(|e| failure(e.into()))?;

        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(Value::Object(env)) = context.get(ENV) {
            for (key, value) in env {
                if let Value::String(value) = value {
                    cmd.env(key, value);
                }
            }
        }

        debug!("Spawning {} {:?} for {}", request.command, request.args, context.id());
        let output = cmd
            .output()
            .await
            .map_err(|e| failure(anyhow::Error::new(e).context(format!("could not run {}", request.command))))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        info!("{} exited with {}", request.command, exit_code);

        updater.update(
            context,
            ContextUpdate::new()
                .set("exit_code", exit_code)
                .set("stdout", stdout),
        );

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(failure(anyhow::anyhow!(
                "{} exited with status {}: {}",
                request.command,
                exit_code,
                stderr.trim()
            )))
        }
    }
}

fn failure(err: anyhow::Error) -> EngineError {
    EngineError::handler(SPAWN, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{Context, DirectUpdater};
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn props(value: Value) -> ResolvedProperties {
        value.as_object().cloned().unwrap_or_default()
    }

    fn updater() -> UpdaterRef {
        Arc::new(DirectUpdater)
    }

    #[tokio::test]
    async fn test_records_stdout_and_exit_code() {
        let ctx = Context::root("0", Map::new());
        let actions = ActionMap::new().value(SPAWN, true);

        SpawnHandler
            .handle(&actions, &ctx, &props(json!({"command": "echo", "args": ["hello"]})), &updater())
            .await
            .unwrap();

        assert_eq!(ctx.get("stdout"), Some(json!("hello")));
        assert_eq!(ctx.get("exit_code"), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_environment_from_context() {
        let mut values = Map::new();
        values.insert(ENV.into(), json!({"CANOPY_GREETING": "hi there"}));
        let ctx = Context::root("0", values);
        let actions = ActionMap::new().value(
            SPAWN,
            json!({"command": "sh", "args": ["-c", "echo $CANOPY_GREETING"]}),
        );

        SpawnHandler
            .handle(&actions, &ctx, &Map::new(), &updater())
            .await
            .unwrap();

        assert_eq!(ctx.get("stdout"), Some(json!("hi there")));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let ctx = Context::root("0", Map::new());
        let actions = ActionMap::new().value(SPAWN, json!({"command": "sh", "args": ["-c", "exit 3"]}));

        let err = SpawnHandler
            .handle(&actions, &ctx, &Map::new(), &updater())
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("spawn failed: sh exited with status 3"));
        assert_eq!(ctx.get("exit_code"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_missing_command_is_rejected() {
        let ctx = Context::root("0", Map::new());
        let actions = ActionMap::new().value(SPAWN, true);
        let err = SpawnHandler
            .handle(&actions, &ctx, &Map::new(), &updater())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailure { .. }));
    }

    #[tokio::test]
    async fn test_ignores_other_actions() {
        let ctx = Context::root("0", Map::new());
        SpawnHandler
            .handle(&ActionMap::new(), &ctx, &Map::new(), &updater())
            .await
            .unwrap();
        assert_eq!(ctx.get("stdout"), None);
    }
}
