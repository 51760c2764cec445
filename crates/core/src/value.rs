//! Property values carried by descriptors.

use crate::context::Context;
use crate::descriptor::DescriptorRef;
use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A descriptor's properties, keyed by name.
pub type Properties = BTreeMap<String, PropValue>;

/// Properties with every accessor evaluated against a node's context.
pub type ResolvedProperties = Map<String, Value>;

/// Function computing a property value from the owning node's context.
pub type Accessor = Arc<dyn Fn(&Context) -> Result<Value> + Send + Sync>;

/// One property value.
#[derive(Clone)]
pub enum PropValue {
    /// Plain data
    Value(Value),
    /// Another descriptor embedded as configuration
    Descriptor(DescriptorRef),
    /// Value read from context at execution time
    Accessor(Accessor),
    /// Nested map that may contain descriptors or accessors
    Map(BTreeMap<String, PropValue>),
    /// Nested list that may contain descriptors or accessors
    List(Vec<PropValue>),
}

impl PropValue {
    /// Build an accessor value.
    pub fn accessor<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Accessor(Arc::new(f))
    }

    /// Whether this value is, or contains, a descriptor.
    pub fn contains_descriptor(&self) -> bool {
        match self {
            Self::Descriptor(_) => true,
            Self::Map(map) => map.values().any(Self::contains_descriptor),
            Self::List(list) => list.iter().any(Self::contains_descriptor),
            Self::Value(_) | Self::Accessor(_) => false,
        }
    }

    /// Plain data, if this value holds no descriptors or accessors.
    pub fn as_data(&self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| v.as_data().map(|v| (k.clone(), v)))
                .collect::<Option<Map<_, _>>>()
                .map(Value::Object),
            Self::List(list) => list
                .iter()
                .map(Self::as_data)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Descriptor(_) | Self::Accessor(_) => None,
        }
    }

    /// Evaluate accessors against `context`.
    ///
    /// A descriptor still present here renders as its type name.
    pub fn resolve(&self, context: &Context) -> Result<Value> {
        Ok(match self {
            Self::Value(v) => v.clone(),
            Self::Accessor(f) => f(context)?,
            Self::Descriptor(d) => Value::String(d.type_name().to_string()),
            Self::Map(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.resolve(context)?);
                }
                Value::Object(out)
            }
            Self::List(list) => Value::Array(
                list.iter()
                    .map(|v| v.resolve(context))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Render as literal notation for debugging: descriptors become
    /// `[type, properties, children]` and accessors `"<accessor>"`.
    pub fn to_notation(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Accessor(_) => Value::String("<accessor>".to_string()),
            Self::Descriptor(d) => d.to_notation(),
            Self::Map(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_notation())).collect(),
            ),
            Self::List(list) => Value::Array(list.iter().map(Self::to_notation).collect()),
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Descriptor(d) => write!(f, "<{}>", d.type_name()),
            Self::Accessor(_) => write!(f, "<accessor>"),
            Self::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Self::List(list) => f.debug_list().entries(list.iter()).finish(),
        }
    }
}

impl From<Value> for PropValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<DescriptorRef> for PropValue {
    fn from(d: DescriptorRef) -> Self {
        Self::Descriptor(d)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Value(Value::from(b))
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Value(Value::from(n))
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        Self::Value(Value::from(n))
    }
}

/// Evaluate every property against `context`.
pub fn resolve_properties(properties: &Properties, context: &Context) -> Result<ResolvedProperties> {
    let mut out = Map::new();
    for (key, value) in properties {
        out.insert(key.clone(), value.resolve(context)?);
    }
    Ok(out)
}

/// Convert a JSON object into plain-data properties.
pub fn properties_from_json(map: Map<String, Value>) -> Properties {
    map.into_iter().map(|(k, v)| (k, PropValue::Value(v))).collect()
}
