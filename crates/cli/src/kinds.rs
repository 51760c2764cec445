//! Built-in resource kinds available to documents.

use crate::spawn::{SpawnHandler, SPAWN};
use canopy_core::{
    ActionMap, CallOrder, Context, Descriptor, KindRef, Pending, PendingUpdate, ResolvedProperties, ResourceKind,
    Result, SessionRef,
};
use canopy_engine::Layer;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Context key holding the environment for spawned processes.
pub const ENV: &str = "env";

/// Plain container.
pub struct GroupKind;

impl ResourceKind for GroupKind {
    fn type_name(&self) -> &str {
        "group"
    }
}

/// Adds its properties to the process environment of every descendant.
///
/// The merged environment is written to the node's own context before its
/// children run, so property values fed by producers are already resolved.
pub struct EnvKind;

impl EnvKind {
    fn actions() -> ActionMap {
        ActionMap::new()
            .call_order(CallOrder::SelfThenChildren)
            .update_context_with(|context, properties| {
                let env = merged_env(context.get(ENV), properties);
                Ok(PendingUpdate::from([(ENV.to_string(), Pending::Ready(env))]))
            })
    }
}

impl ResourceKind for EnvKind {
    fn type_name(&self) -> &str {
        "env"
    }

    fn prepare_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        Self::actions()
    }

    fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        Self::actions()
    }
}

/// `inherited` overlaid with `own`, every value rendered as a string.
fn merged_env(inherited: Option<Value>, own: &ResolvedProperties) -> Value {
    let mut env = match inherited {
        Some(Value::Object(inherited)) => inherited,
        _ => Map::new(),
    };
    for (key, value) in own {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(key.clone(), Value::String(value));
    }
    Value::Object(env)
}

/// A producer whose resolved value is its `value` property.
pub struct ValueKind;

impl ResourceKind for ValueKind {
    fn type_name(&self) -> &str {
        "value"
    }

    fn resolved_value(&self, node: &Descriptor, context: &Context) -> Result<Value> {
        match node.property("value") {
            Some(value) => value.resolve(context),
            None => Ok(Value::Null),
        }
    }
}

/// Runs `command` with `args` when added. Not usable as a property value:
/// its output only exists after `add`.
///
/// ```json
/// ["exec", {"command": "echo", "args": ["hello"]}]
/// ```
pub struct ExecKind;

impl ResourceKind for ExecKind {
    fn type_name(&self) -> &str {
        "exec"
    }

    fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        ActionMap::new().value(SPAWN, true)
    }
}

/// All built-in kinds.
pub fn builtin_kinds() -> Vec<KindRef> {
    vec![
        Arc::new(GroupKind),
        Arc::new(EnvKind),
        Arc::new(ValueKind),
        Arc::new(ExecKind),
    ]
}

/// Built-in kinds plus the `spawn` handler.
pub fn builtin_layer() -> Layer {
    builtin_kinds()
        .into_iter()
        .fold(Layer::new(), Layer::with_kind)
        .with_handler(Arc::new(SpawnHandler))
}
