//! Literal tree notation.
//!
//! A node is `[type, properties?, children?]`:
//!
//! ```text
//! ["group", [
//!     ["exec", {"command": "echo", "args": ["hi"]}],
//!     ["env", {"HOME": "/tmp"}, [ ... ]]
//! ]]
//! ```
//!
//! `[type, children]` is short for `[type, {}, children]`. A property value
//! shaped like a node (`[string, object]` or `[string, object, array]`) is
//! compiled into a nested descriptor.

use crate::registry::TypeRegistry;
use canopy_core::{Descriptor, DescriptorRef, EngineError, PropValue, Properties, Result};
use serde_json::{Map, Value};

/// Compile a notation document into a descriptor tree.
pub fn compile(document: &Value, registry: &TypeRegistry) -> Result<DescriptorRef> {
    let Value::Array(parts) = document else {
        return Err(not_a_descriptor(document, "expected an array"));
    };
    if parts.is_empty() || parts.len() > 3 {
        return Err(not_a_descriptor(document, "expected 1 to 3 elements"));
    }

    let Some(tag) = parts[0].as_str().filter(|t| !t.is_empty()) else {
        return Err(not_a_descriptor(document, "expected tag to be a string"));
    };

    let empty = Map::new();
    let no_children = Vec::new();
    let (properties, children) = match (parts.get(1), parts.get(2)) {
        (None | Some(Value::Null), None) => (&empty, &no_children),
        (Some(Value::Array(children)), None) => (&empty, children),
        (Some(Value::Object(properties)), None | Some(Value::Null)) => (properties, &no_children),
        (Some(Value::Object(properties)), Some(Value::Array(children))) => (properties, children),
        (Some(Value::Object(_)), Some(_)) => {
            return Err(not_a_descriptor(document, "expected children to be an array"))
        }
        _ => return Err(not_a_descriptor(document, "expected properties to be an object")),
    };

    let properties = properties
        .iter()
        .map(|(key, value)| {
            let value = if is_node_form(value) {
                PropValue::Descriptor(compile(value, registry)?)
            } else {
                PropValue::Value(value.clone())
            };
            Ok((key.clone(), value))
        })
        .collect::<Result<Properties>>()?;

    let children = children
        .iter()
        .map(|child| compile(child, registry))
        .collect::<Result<Vec<_>>>()?;

    let kind = registry.lookup(tag)?;
    Ok(Descriptor::new(kind, properties, children))
}

fn is_node_form(value: &Value) -> bool {
    match value {
        Value::Array(parts) => {
            (2..=3).contains(&parts.len()) && parts[0].is_string() && parts[1].is_object()
        }
        _ => false,
    }
}

fn not_a_descriptor(document: &Value, reason: &str) -> EngineError {
    EngineError::NotADescriptor(format!("{document}: {reason}"))
}
