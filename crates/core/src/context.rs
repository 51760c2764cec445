//! Scoped per-node context.
//!
//! Each execution node owns one [`Context`]. Lookups fall back to the
//! parent node's context; writes always land in the owning node's map.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;

/// Shared handle to a node's context.
pub type ContextRef = Arc<Context>;

/// Key holding the id of the owning node.
pub const ID_KEY: &str = "id";

/// Key holding the per-transition state record.
pub const STATE_KEY: &str = "state";

/// Mutable key/value scope of one execution node.
#[derive(Debug)]
pub struct Context {
    id: String,
    // None marks an explicit removal that hides any ancestor value
    values: RwLock<HashMap<String, Option<Value>>>,
    parent: Option<Weak<Context>>,
}

impl Context {
    /// Create a context with no parent scope.
    pub fn root(id: impl Into<String>, values: Map<String, Value>) -> ContextRef {
        Arc::new(Self::build(id.into(), values, None))
    }

    /// Create a context that falls back to `parent` for missing keys.
    pub fn child(id: impl Into<String>, values: Map<String, Value>, parent: &ContextRef) -> ContextRef {
        Arc::new(Self::build(id.into(), values, Some(Arc::downgrade(parent))))
    }

    fn build(id: String, values: Map<String, Value>, parent: Option<Weak<Context>>) -> Self {
        let mut local: HashMap<String, Option<Value>> =
            values.into_iter().map(|(k, v)| (k, Some(v))).collect();
        local.insert(ID_KEY.to_string(), Some(Value::String(id.clone())));
        Self {
            id,
            values: RwLock::new(local),
            parent,
        }
    }

    /// Id of the owning node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parent scope, if it is still alive.
    pub fn parent(&self) -> Option<ContextRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Look up a key here, then in each ancestor.
    pub fn get(&self, key: &str) -> Option<Value> {
        {
            let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = values.get(key) {
                return slot.clone();
            }
        }
        self.parent().and_then(|parent| parent.get(key))
    }

    /// Look up a key in this scope only.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned().flatten()
    }

    /// Whether this scope itself holds a value for `key`.
    pub fn contains_local(&self, key: &str) -> bool {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        matches!(values.get(key), Some(Some(_)))
    }

    /// Shallow-assign each entry of `update` into this scope.
    pub fn merge(&self, update: ContextUpdate) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in update.entries {
            trace!("{}: {} = {:?}", self.id, key, value);
            values.insert(key, value);
        }
    }

    /// Remove the visible value of `key`, including one inherited from an ancestor.
    pub fn unset(&self, key: &str) {
        self.merge(ContextUpdate::new().unset(key));
    }

    /// Values held by this scope only.
    pub fn local_snapshot(&self) -> Map<String, Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let ordered: BTreeMap<_, _> = values
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        ordered.into_iter().collect()
    }

    /// Every visible value, ancestors included.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut merged = self.parent().map(|p| p.snapshot()).unwrap_or_default();
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in values.iter() {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
    }
}

/// A shallow set of assignments and removals for a [`Context`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    entries: BTreeMap<String, Option<Value>>,
}

impl ContextUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove a value.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.entries.insert(key.into(), None);
        self
    }

    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The assigned value for `key`, if this update sets it.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(Option::as_ref)
    }

    /// Iterate over `(key, Some(value) | None)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Record the outcome of a transition: `{state: {<transition>: ok[, error]}}`.
    pub fn state(transition: &str, error: Option<String>) -> Self {
        let mut state = Map::new();
        state.insert(transition.to_string(), Value::Bool(error.is_none()));
        if let Some(error) = error {
            state.insert("error".to_string(), Value::String(error));
        }
        Self::new().set(STATE_KEY, Value::Object(state))
    }
}

impl From<Map<String, Value>> for ContextUpdate {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        }
    }
}

/// Writes updates into node contexts on behalf of handlers.
pub trait ContextUpdater: Send + Sync {
    /// Apply `update` to the context of the node `context` belongs to.
    fn update(&self, context: &Context, update: ContextUpdate);
}

/// Shared handle to an updater.
pub type UpdaterRef = Arc<dyn ContextUpdater>;

/// Updater that merges straight into the given context.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectUpdater;

impl ContextUpdater for DirectUpdater {
    fn update(&self, context: &Context, update: ContextUpdate) {
        context.merge(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_id_always_present() {
        let ctx = Context::root("0", Map::new());
        assert_eq!(ctx.id(), "0");
        assert_eq!(ctx.get("id"), Some(json!("0")));
    }

    #[test]
    fn test_child_sees_later_parent_writes() {
        let parent = Context::root("0", Map::new());
        let child = Context::child("0.0", Map::new(), &parent);

        parent.merge(ContextUpdate::new().set("changed", "value"));

        assert_eq!(child.get("changed"), Some(json!("value")));
        assert!(!child.contains_local("changed"));
    }

    #[test]
    fn test_writes_stay_local() {
        let parent = Context::root("0", map(json!({"shared": 1})));
        let child = Context::child("0.0", Map::new(), &parent);

        child.merge(ContextUpdate::new().set("shared", 2));

        assert_eq!(child.get("shared"), Some(json!(2)));
        assert_eq!(parent.get("shared"), Some(json!(1)));
    }

    #[test]
    fn test_merge_replaces_sub_object() {
        let ctx = Context::root("0", Map::new());
        ctx.merge(ContextUpdate::new().set("obj", json!({"sub": "value"})));
        ctx.merge(ContextUpdate::new().set("obj", json!({"sub2": "value2"})));

        assert_eq!(ctx.get("obj"), Some(json!({"sub2": "value2"})));
    }

    #[test]
    fn test_unset_hides_inherited_value() {
        let parent = Context::root("0", map(json!({"obj": {"sub": 1}, "obj2": "thing"})));
        let child = Context::child("0.0", Map::new(), &parent);

        child.unset("obj");

        assert_eq!(child.get("obj"), None);
        assert_eq!(child.get("obj2"), Some(json!("thing")));
        assert!(parent.get("obj").is_some());
        assert!(!child.snapshot().contains_key("obj"));
    }

    #[test]
    fn test_state_update() {
        let update = ContextUpdate::state("add", Some("boom in 0".into()));
        assert_eq!(
            update.value("state"),
            Some(&json!({"add": false, "error": "boom in 0"}))
        );
        let update = ContextUpdate::state("remove", None);
        assert_eq!(update.value("state"), Some(&json!({"remove": true})));
    }
}
