//! Action maps: what a node asks the handlers to do for one transition.

use crate::context::{Context, ContextRef, UpdaterRef};
use crate::error::{EngineError, Result};
use crate::value::ResolvedProperties;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Handler name of the `run` vocabulary entry.
pub const RUN: &str = "run";

/// Handler name of the `updateContext` vocabulary entry.
pub const UPDATE_CONTEXT: &str = "updateContext";

/// Reserved key selecting the call order; never dispatched to a handler.
pub const CALL_ORDER: &str = "callOrder";

/// Arguments passed to a `run` action.
#[derive(Clone)]
pub struct RunArgs {
    /// Context of the executing node
    pub context: ContextRef,
    /// Resolved properties of the executing node
    pub properties: ResolvedProperties,
    /// Writes into node contexts
    pub updater: UpdaterRef,
}

/// A `run` action body.
pub type RunFn = Arc<dyn Fn(RunArgs) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// An `updateContext` action body.
pub type UpdateFn =
    Arc<dyn Fn(&Context, &ResolvedProperties) -> anyhow::Result<PendingUpdate> + Send + Sync>;

/// A value computed from context when the handler runs.
pub type DeferredFn = Arc<dyn Fn(&Context) -> Result<Value> + Send + Sync>;

/// One entry of an action map.
#[derive(Clone)]
pub enum Action {
    /// Literal value consumed by the handler as is
    Value(Value),
    /// Value computed from the node's context at dispatch time
    Deferred(DeferredFn),
    /// Function invoked by the `run` handler
    Run(RunFn),
    /// Function producing context updates for the `updateContext` handler
    Update(UpdateFn),
}

impl Action {
    /// The literal or deferred value of this action.
    ///
    /// Returns `None` for function actions that only a specific handler understands.
    pub fn evaluate(&self, context: &Context) -> Option<Result<Value>> {
        match self {
            Self::Value(v) => Some(Ok(v.clone())),
            Self::Deferred(f) => Some(f(context)),
            Self::Run(_) | Self::Update(_) => None,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Deferred(_) => write!(f, "<deferred>"),
            Self::Run(_) => write!(f, "<run>"),
            Self::Update(_) => write!(f, "<updateContext>"),
        }
    }
}

/// Leaf of a pending context update; may still need awaiting.
pub enum Pending {
    /// Already available
    Ready(Value),
    /// Produced asynchronously
    Deferred(BoxFuture<'static, anyhow::Result<Value>>),
    /// Nested object whose leaves may be pending
    Object(PendingUpdate),
    /// Remove the key (top level only)
    Unset,
}

impl Pending {
    /// Wrap a future producing the value.
    pub fn later<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }
}

impl From<Value> for Pending {
    fn from(v: Value) -> Self {
        Self::Ready(v)
    }
}

/// Update produced by an `updateContext` function, keyed by context key.
pub type PendingUpdate = BTreeMap<String, Pending>;

/// How a node's own actions are ordered against its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOrder {
    /// Self and all children concurrently
    #[default]
    Parallel,
    /// Self to completion, then children concurrently
    SelfThenChildren,
    /// Self, then all but the last child concurrently, then the last child
    PropertiesMode,
}

impl CallOrder {
    /// Wire name used in action maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "PARALLEL",
            Self::SelfThenChildren => "SELF_THEN_CHILDREN",
            Self::PropertiesMode => "PROPERTIES_MODE",
        }
    }
}

impl FromStr for CallOrder {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PARALLEL" => Ok(Self::Parallel),
            "SELF_THEN_CHILDREN" => Ok(Self::SelfThenChildren),
            "PROPERTIES_MODE" => Ok(Self::PropertiesMode),
            other => Err(EngineError::InvalidCallOrder(other.to_string())),
        }
    }
}

impl fmt::Display for CallOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Allocate what the node needs before it can activate
    #[serde(rename = "prepareForAdd")]
    PrepareForAdd,
    /// Make the resource live
    #[serde(rename = "add")]
    Add,
    /// Tear the resource down
    #[serde(rename = "remove")]
    Remove,
}

impl Transition {
    /// Case-sensitive transition name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrepareForAdd => "prepareForAdd",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for Transition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prepareForAdd" => Ok(Self::PrepareForAdd),
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            other => Err(EngineError::UnsupportedTransition(other.to_string())),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map from handler name to action for one node and one transition.
#[derive(Debug, Clone, Default)]
pub struct ActionMap {
    actions: BTreeMap<String, Action>,
}

impl ActionMap {
    /// Create an empty action map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary entry.
    pub fn with(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Set a literal entry.
    pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(name, Action::Value(value.into()))
    }

    /// Set an entry computed from context at dispatch time.
    pub fn deferred<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context) -> Result<Value> + Send + Sync + 'static,
    {
        self.with(name, Action::Deferred(Arc::new(f)))
    }

    /// Set the call order.
    pub fn call_order(self, order: CallOrder) -> Self {
        self.value(CALL_ORDER, order.as_str())
    }

    /// Set the `run` action.
    pub fn run<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RunArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let f: RunFn = Arc::new(move |args| f(args).boxed());
        self.with(RUN, Action::Run(f))
    }

    /// Set a literal `updateContext` action.
    pub fn update_context(self, values: Map<String, Value>) -> Self {
        self.with(UPDATE_CONTEXT, Action::Value(Value::Object(values)))
    }

    /// Set an `updateContext` action computed at dispatch time.
    pub fn update_context_with<F>(self, f: F) -> Self
    where
        F: Fn(&Context, &ResolvedProperties) -> anyhow::Result<PendingUpdate> + Send + Sync + 'static,
    {
        self.with(UPDATE_CONTEXT, Action::Update(Arc::new(f)))
    }

    /// Entry for `name`.
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Whether an entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Entry names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Parse the `callOrder` entry; absent means [`CallOrder::Parallel`].
    pub fn order(&self) -> Result<CallOrder> {
        match self.actions.get(CALL_ORDER) {
            None => Ok(CallOrder::Parallel),
            Some(Action::Value(Value::String(s))) => s.parse(),
            Some(other) => Err(EngineError::InvalidCallOrder(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_order_is_parallel() {
        assert_eq!(ActionMap::new().order().unwrap(), CallOrder::Parallel);
    }

    #[test]
    fn test_order_round_trips_through_entry() {
        let actions = ActionMap::new().call_order(CallOrder::PropertiesMode);
        assert_eq!(actions.order().unwrap(), CallOrder::PropertiesMode);
        assert!(actions.contains(CALL_ORDER));
    }

    #[test]
    fn test_unknown_order_rejected() {
        let actions = ActionMap::new().value(CALL_ORDER, "SIDEWAYS");
        assert_eq!(
            actions.order().unwrap_err(),
            EngineError::InvalidCallOrder("SIDEWAYS".into())
        );
        let actions = ActionMap::new().value(CALL_ORDER, 3);
        assert!(matches!(actions.order(), Err(EngineError::InvalidCallOrder(_))));
    }

    #[test]
    fn test_transition_names() {
        assert_eq!("prepareForAdd".parse::<Transition>().unwrap(), Transition::PrepareForAdd);
        assert_eq!(Transition::Remove.to_string(), "remove");
        assert_eq!(
            "Add".parse::<Transition>().unwrap_err(),
            EngineError::UnsupportedTransition("Add".into())
        );
    }

    #[test]
    fn test_evaluate_deferred() {
        let ctx = Context::root("0.3", Map::new());
        let actions = ActionMap::new().deferred("echo", |c| Ok(json!({"from": c.id()})));
        let value = actions.get("echo").and_then(|a| a.evaluate(&ctx)).unwrap().unwrap();
        assert_eq!(value, json!({"from": "0.3"}));
    }
}
