//! Dependency inversion for descriptors used as property values.
//!
//! A descriptor whose properties embed other descriptors is rewritten so
//! the embedded ones run first and the owner reads their resolved values:
//!
//! ```text
//! Synth({def: SynthDef(..)})
//!
//! Properties({}, [
//!     SynthDef(..),
//!     PropertiesOwner({indices: [0]}, [
//!         Synth({def: <accessor 0>})
//!     ])
//! ])
//! ```

use canopy_core::{
    ActionMap, CallOrder, Context, Descriptor, DescriptorRef, EngineError, Pending, PendingUpdate,
    PropValue, Properties, ResourceKind, Result, SessionRef,
};
use serde_json::Value;
use std::sync::Arc;

/// Type name of the wrapper whose children are the producers and the owner.
pub const PROPERTIES: &str = "Properties";

/// Type name of the wrapper holding the rewritten owner.
pub const PROPERTIES_OWNER: &str = "PropertiesOwner";

/// Context key holding producer values, in property index order.
pub const RESOLVED_VALUES: &str = "resolvedValues";

/// Parent of the producers and the properties owner.
pub struct PropertiesKind;

impl ResourceKind for PropertiesKind {
    fn type_name(&self) -> &str {
        PROPERTIES
    }

    fn prepare_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        ActionMap::new().call_order(CallOrder::PropertiesMode)
    }
}

/// Holds the owner; collects the producers' resolved values before it runs.
pub struct PropertiesOwnerKind;

impl ResourceKind for PropertiesOwnerKind {
    fn type_name(&self) -> &str {
        PROPERTIES_OWNER
    }

    fn prepare_actions(&self, _node: &Descriptor, session: &SessionRef) -> ActionMap {
        let session = Arc::clone(session);
        ActionMap::new()
            .call_order(CallOrder::SelfThenChildren)
            .update_context_with(move |context, _properties| {
                let values = collect_resolved_values(&session, context.id())?;
                Ok(PendingUpdate::from([(
                    RESOLVED_VALUES.to_string(),
                    Pending::Ready(Value::Array(values)),
                )]))
            })
    }
}

fn collect_resolved_values(session: &SessionRef, owner_id: &str) -> Result<Vec<Value>> {
    session
        .producer_ids(owner_id)
        .iter()
        .map(|id| {
            let descriptor = session
                .descriptor(id)
                .ok_or_else(|| EngineError::UnknownNode(id.clone()))?;
            let context = session
                .context(id)
                .ok_or_else(|| EngineError::UnknownNode(id.clone()))?;
            descriptor.resolved_value(&context)
        })
        .collect()
}

/// Read the resolved value of producer `index` through `context`'s scope chain.
pub fn resolved_value_at(context: &Context, index: usize) -> Result<Value> {
    context
        .get(RESOLVED_VALUES)
        .and_then(|values| values.get(index).cloned())
        .ok_or_else(|| EngineError::MissingResolvedValue {
            node: context.id().to_string(),
            index,
        })
}

/// Whether `descriptor` is one of the inversion wrappers.
pub fn is_wrapper(descriptor: &Descriptor) -> bool {
    matches!(descriptor.type_name(), PROPERTIES | PROPERTIES_OWNER)
}

/// Rewrite `descriptor` if its properties embed descriptors.
///
/// Returns `None` when no rewrite is needed.
pub fn invert_properties(descriptor: &Descriptor) -> Option<DescriptorRef> {
    if is_wrapper(descriptor) {
        return None;
    }

    let mut producers = Vec::new();
    let accessors: Properties = descriptor
        .properties()
        .iter()
        .map(|(key, value)| (key.clone(), replace_descriptors(value, &mut producers)))
        .collect();

    if producers.is_empty() {
        return None;
    }

    let indices: Vec<Value> = (0..producers.len()).map(Value::from).collect();
    let owner = descriptor.with_parts(accessors, descriptor.children().to_vec());
    let owner_wrapper = Descriptor::builder(Arc::new(PropertiesOwnerKind))
        .property("indices", Value::Array(indices))
        .child(owner)
        .build();

    producers.push(owner_wrapper);
    Some(Descriptor::new(Arc::new(PropertiesKind), Properties::new(), producers))
}

fn replace_descriptors(value: &PropValue, producers: &mut Vec<DescriptorRef>) -> PropValue {
    match value {
        PropValue::Descriptor(d) => {
            let index = producers.len();
            producers.push(d.deep_clone());
            PropValue::accessor(move |context| resolved_value_at(context, index))
        }
        PropValue::Map(map) => PropValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_descriptors(v, producers)))
                .collect(),
        ),
        PropValue::List(list) => PropValue::List(
            list.iter().map(|v| replace_descriptors(v, producers)).collect(),
        ),
        other => other.clone(),
    }
}
