//! Resource descriptors: immutable templates of a resource and its children.

use crate::action::{ActionMap, Transition};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::session::SessionRef;
use crate::value::{PropValue, Properties};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a descriptor.
pub type DescriptorRef = Arc<Descriptor>;

/// Shared handle to a kind.
pub type KindRef = Arc<dyn ResourceKind>;

/// Behavior of one type of resource.
///
/// Every hook is optional. Hooks must not have side effects; they return
/// values the engine acts on later.
pub trait ResourceKind: Send + Sync + 'static {
    /// Type name, used for registry lookup and debug output.
    fn type_name(&self) -> &str;

    /// Properties merged under the caller's properties at construction.
    fn default_properties(&self) -> Properties {
        Properties::new()
    }

    /// Actions needed before the node may activate.
    fn prepare_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        ActionMap::new()
    }

    /// Actions that make the resource live.
    fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        ActionMap::new()
    }

    /// Actions that tear the resource down.
    fn deactivate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
        ActionMap::new()
    }

    /// Type that must exist somewhere above this node.
    fn required_ancestor(&self, _node: &Descriptor) -> Option<String> {
        None
    }

    /// Replacement node executed in place of this one.
    ///
    /// The replacement may contain `node` itself as a descendant; that
    /// occurrence is where this node's own actions run.
    fn subgraph(&self, _node: &DescriptorRef) -> Option<DescriptorRef> {
        None
    }

    /// Values seeded into this node's own context.
    fn initial_context(&self, _node: &Descriptor) -> Map<String, Value> {
        Map::new()
    }

    /// Values seeded into each child's context, shadowing this node's.
    fn child_context(&self, _node: &Descriptor, _parent: &Context) -> Map<String, Value> {
        Map::new()
    }

    /// Value handed to the owner when this node is used as a property value.
    fn resolved_value(&self, _node: &Descriptor, _context: &Context) -> Result<Value> {
        Err(EngineError::NoResolvedValue(self.type_name().to_string()))
    }
}

/// An immutable resource template: kind, properties and children.
#[derive(Clone)]
pub struct Descriptor {
    kind: KindRef,
    properties: Properties,
    children: Vec<DescriptorRef>,
}

impl Descriptor {
    /// Create a descriptor, merging the kind's default properties under `properties`.
    pub fn new(kind: KindRef, properties: Properties, children: Vec<DescriptorRef>) -> DescriptorRef {
        let mut merged = kind.default_properties();
        merged.extend(properties);
        Arc::new(Self {
            kind,
            properties: merged,
            children,
        })
    }

    /// Start building a descriptor of `kind`.
    pub fn builder(kind: KindRef) -> DescriptorBuilder {
        DescriptorBuilder {
            kind,
            properties: Properties::new(),
            children: Vec::new(),
        }
    }

    /// A descriptor with no properties and no children.
    pub fn leaf(kind: KindRef) -> DescriptorRef {
        Self::new(kind, Properties::new(), Vec::new())
    }

    /// Kind of this descriptor.
    pub fn kind(&self) -> &KindRef {
        &self.kind
    }

    /// Type name of the kind.
    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Properties, defaults included.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Property by key.
    pub fn property(&self, key: &str) -> Option<&PropValue> {
        self.properties.get(key)
    }

    /// Children in order.
    pub fn children(&self) -> &[DescriptorRef] {
        &self.children
    }

    /// New descriptor of the same kind with replaced properties and children.
    pub fn with_parts(&self, properties: Properties, children: Vec<DescriptorRef>) -> DescriptorRef {
        Arc::new(Self {
            kind: Arc::clone(&self.kind),
            properties,
            children,
        })
    }

    /// Fresh copy of this descriptor, its embedded descriptors and its children.
    pub fn deep_clone(&self) -> DescriptorRef {
        let properties = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), deep_clone_value(v)))
            .collect();
        let children = self.children.iter().map(|c| c.deep_clone()).collect();
        self.with_parts(properties, children)
    }

    /// Actions this descriptor asks for in `transition`.
    pub fn actions_for(&self, transition: Transition, session: &SessionRef) -> ActionMap {
        match transition {
            Transition::PrepareForAdd => self.kind.prepare_actions(self, session),
            Transition::Add => self.kind.activate_actions(self, session),
            Transition::Remove => self.kind.deactivate_actions(self, session),
        }
    }

    /// See [`ResourceKind::required_ancestor`].
    pub fn required_ancestor(&self) -> Option<String> {
        self.kind.required_ancestor(self)
    }

    /// See [`ResourceKind::initial_context`].
    pub fn initial_context(&self) -> Map<String, Value> {
        self.kind.initial_context(self)
    }

    /// See [`ResourceKind::child_context`].
    pub fn child_context(&self, parent: &Context) -> Map<String, Value> {
        self.kind.child_context(self, parent)
    }

    /// See [`ResourceKind::resolved_value`].
    pub fn resolved_value(&self, context: &Context) -> Result<Value> {
        self.kind.resolved_value(self, context)
    }

    /// Render as `[type, properties, children]`.
    pub fn to_notation(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_notation()))
            .collect();
        Value::Array(vec![
            Value::String(self.type_name().to_string()),
            Value::Object(properties),
            Value::Array(self.children.iter().map(|c| c.to_notation()).collect()),
        ])
    }
}

/// Hook wrapper so a descriptor handle can call `subgraph` with itself.
pub trait DescriptorExt {
    /// See [`ResourceKind::subgraph`].
    fn subgraph(&self) -> Option<DescriptorRef>;
}

impl DescriptorExt for DescriptorRef {
    fn subgraph(&self) -> Option<DescriptorRef> {
        self.kind.subgraph(self)
    }
}

fn deep_clone_value(value: &PropValue) -> PropValue {
    match value {
        PropValue::Descriptor(d) => PropValue::Descriptor(d.deep_clone()),
        PropValue::Map(map) => PropValue::Map(
            map.iter().map(|(k, v)| (k.clone(), deep_clone_value(v))).collect(),
        ),
        PropValue::List(list) => PropValue::List(list.iter().map(deep_clone_value).collect()),
        other => other.clone(),
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type", &self.type_name())
            .field("properties", &self.properties)
            .field("children", &self.children)
            .finish()
    }
}

/// Builder for [`Descriptor`].
pub struct DescriptorBuilder {
    kind: KindRef,
    properties: Properties,
    children: Vec<DescriptorRef>,
}

impl DescriptorBuilder {
    /// Set a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Append a child.
    pub fn child(mut self, child: DescriptorRef) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = DescriptorRef>) -> Self {
        self.children.extend(children);
        self
    }

    /// Finish.
    pub fn build(self) -> DescriptorRef {
        Descriptor::new(self.kind, self.properties, self.children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Synth;

    impl ResourceKind for Synth {
        fn type_name(&self) -> &str {
            "Synth"
        }

        fn default_properties(&self) -> Properties {
            Properties::from([
                ("freq".to_string(), PropValue::from(440i64)),
                ("amp".to_string(), PropValue::from(0.5)),
            ])
        }
    }

    struct Plain;

    impl ResourceKind for Plain {
        fn type_name(&self) -> &str {
            "Plain"
        }
    }

    #[test]
    fn test_defaults_merged_under_properties() {
        let d = Descriptor::builder(Arc::new(Synth)).property("freq", 220i64).build();
        assert_eq!(d.property("freq").and_then(PropValue::as_data), Some(json!(220)));
        assert_eq!(d.property("amp").and_then(PropValue::as_data), Some(json!(0.5)));
    }

    #[test]
    fn test_deep_clone_makes_fresh_values() {
        let inner = Descriptor::leaf(Arc::new(Plain));
        let child = Descriptor::leaf(Arc::new(Plain));
        let d = Descriptor::builder(Arc::new(Plain))
            .property("def", inner.clone())
            .child(child.clone())
            .build();

        let copy = d.deep_clone();

        assert!(!Arc::ptr_eq(&copy, &d));
        assert!(!Arc::ptr_eq(&copy.children()[0], &child));
        match copy.property("def") {
            Some(PropValue::Descriptor(c)) => assert!(!Arc::ptr_eq(c, &inner)),
            other => panic!("expected descriptor, got {other:?}"),
        }
    }

    #[test]
    fn test_default_resolved_value_is_an_error() {
        let d = Descriptor::leaf(Arc::new(Plain));
        let ctx = Context::root("0", Map::new());
        assert_eq!(
            d.resolved_value(&ctx).unwrap_err(),
            EngineError::NoResolvedValue("Plain".into())
        );
    }

    #[test]
    fn test_to_notation() {
        let d = Descriptor::builder(Arc::new(Plain))
            .property("key", "value")
            .child(Descriptor::leaf(Arc::new(Plain)))
            .build();
        assert_eq!(
            d.to_notation(),
            json!(["Plain", {"key": "value"}, [["Plain", {}, []]]])
        );
    }
}
