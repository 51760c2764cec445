//! Tree expansion: descriptors to an id-addressed execution tree.
//!
//! Expansion assigns ids (`"0"`, `"0.1"`, `"0.1.0"`, ...), creates a context
//! per node, injects required ancestors, applies dependency inversion and
//! substitutes subgraphs. The result is what transitions run against.

use crate::command::CommandNode;
use crate::properties::invert_properties;
use crate::registry::TypeRegistry;
use canopy_core::{
    ActionMap, Context, ContextRef, ContextUpdate, Descriptor, DescriptorExt, DescriptorRef, EngineError,
    Properties, Result, SessionRef, Transition, STATE_KEY,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Id segment used for a substituted subgraph root.
pub const SUBGRAPH: &str = "subgraph";

/// One node of the expanded tree.
#[derive(Debug, Clone)]
pub struct ExecutionNode {
    /// Dot-separated path id
    pub id: String,
    /// Descriptor executing at this node
    pub descriptor: DescriptorRef,
    /// Type name of the descriptor
    pub type_name: String,
    /// Expanded children
    pub children: Vec<ExecutionNode>,
}

impl ExecutionNode {
    fn count(&self) -> usize {
        1 + self.children.iter().map(ExecutionNode::count).sum::<usize>()
    }
}

/// Per-node introspection: id, type and the last transition's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugState {
    /// Node id
    pub id: String,
    /// Type name
    #[serde(rename = "class")]
    pub class: String,
    /// `running`, `removed`, `prepared` or `ERROR: <message>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Children, omitted when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DebugState>,
}

struct NodeEntry {
    descriptor: DescriptorRef,
    context: ContextRef,
}

/// The expanded tree with its node table.
///
/// The node table also holds descriptors replaced by a subgraph, so their
/// contexts stay available as the subgraph's parent scope.
pub struct DryadTree {
    root: ExecutionNode,
    nodes: HashMap<String, NodeEntry>,
    producers: HashMap<String, Vec<String>>,
}

impl DryadTree {
    /// Expand `root`.
    ///
    /// `registry` resolves required ancestors; `root_context` is seeded into
    /// every node's context. Fails without building anything on
    /// `UnregisteredType`.
    pub fn new(root: DescriptorRef, registry: &TypeRegistry, root_context: Map<String, Value>) -> Result<Self> {
        let mut expander = Expander {
            registry,
            root_context,
            nodes: HashMap::new(),
            producers: HashMap::new(),
            landing: HashMap::new(),
        };
        let root = expander.expand(root, None, String::new(), Memo::default())?;
        debug!("Expanded tree: {} nodes", root.count());

        Ok(Self {
            root,
            nodes: expander.nodes,
            producers: expander.producers,
        })
    }

    /// Root of the expanded tree.
    pub fn root(&self) -> &ExecutionNode {
        &self.root
    }

    /// Number of nodes in the expanded tree.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// Descriptor registered at `id`.
    pub fn descriptor(&self, id: &str) -> Option<DescriptorRef> {
        self.nodes.get(id).map(|n| Arc::clone(&n.descriptor))
    }

    /// Context registered at `id`.
    pub fn context(&self, id: &str) -> Option<ContextRef> {
        self.nodes.get(id).map(|n| Arc::clone(&n.context))
    }

    /// Producer ids feeding the properties owner at `owner_id`.
    pub fn producer_ids(&self, owner_id: &str) -> Vec<String> {
        self.producers.get(owner_id).cloned().unwrap_or_default()
    }

    /// Merge `update` into the context of node `id`.
    pub fn update_context(&self, id: &str, update: ContextUpdate) -> Result<()> {
        let entry = self.entry(id)?;
        trace!("Updating context {}: {:?}", id, update);
        entry.context.merge(update);
        Ok(())
    }

    /// Depth-first visit of every expanded node.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&ExecutionNode, &ContextRef),
    {
        fn visit<F: FnMut(&ExecutionNode, &ContextRef)>(tree: &DryadTree, node: &ExecutionNode, f: &mut F) {
            if let Some(entry) = tree.nodes.get(&node.id) {
                f(node, &entry.context);
            }
            for child in &node.children {
                visit(tree, child, f);
            }
        }
        visit(self, &self.root, &mut f);
    }

    /// Ask every node for its actions in `transition`.
    pub fn collect_command_tree(&self, transition: Transition, session: &SessionRef) -> Result<CommandNode> {
        self.collect(&self.root, transition, session)
    }

    fn collect(&self, node: &ExecutionNode, transition: Transition, session: &SessionRef) -> Result<CommandNode> {
        let entry = self.entry(&node.id)?;
        let children = node
            .children
            .iter()
            .map(|child| self.collect(child, transition, session))
            .collect::<Result<Vec<_>>>()?;

        Ok(CommandNode::new(
            entry.descriptor.actions_for(transition, session),
            Arc::clone(&entry.context),
            entry.descriptor.properties().clone(),
            node.id.clone(),
            children,
        ))
    }

    /// Single-node command running `actions` against node `id`'s existing context.
    pub fn make_command_tree(&self, id: &str, actions: ActionMap) -> Result<CommandNode> {
        let entry = self.entry(id)?;
        Ok(CommandNode::out_of_band(
            actions,
            Arc::clone(&entry.context),
            entry.descriptor.properties().clone(),
            id,
        ))
    }

    /// Current state of every node, mirroring the tree.
    pub fn debug_state(&self) -> DebugState {
        self.debug_node(&self.root)
    }

    fn debug_node(&self, node: &ExecutionNode) -> DebugState {
        let state = self
            .nodes
            .get(&node.id)
            .and_then(|entry| entry.context.get_local(STATE_KEY))
            .and_then(|state| format_state(&state));

        DebugState {
            id: node.id.clone(),
            class: node.type_name.clone(),
            state,
            children: node.children.iter().map(|c| self.debug_node(c)).collect(),
        }
    }

    /// The expanded tree as `[type, properties, children]` notation.
    pub fn play_graph(&self) -> Value {
        fn render(node: &ExecutionNode) -> Value {
            let properties: Map<String, Value> = node
                .descriptor
                .properties()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_notation()))
                .collect();
            Value::Array(vec![
                Value::String(node.type_name.clone()),
                Value::Object(properties),
                Value::Array(node.children.iter().map(render).collect()),
            ])
        }
        render(&self.root)
    }

    fn entry(&self, id: &str) -> Result<&NodeEntry> {
        self.nodes
            .get(id)
            .ok_or_else(|| EngineError::UnknownNode(id.to_string()))
    }
}

fn format_state(state: &Value) -> Option<String> {
    let object = match state {
        Value::Null => return None,
        Value::Object(object) => object,
        other => return Some(format!("Unknown: {other}")),
    };
    let flag = |key: &str| object.get(key).is_some_and(truthy);

    let formatted = if let Some(error) = object.get("error").filter(|e| truthy(e)) {
        match error {
            Value::String(message) => format!("ERROR: {message}"),
            other => format!("ERROR: {other}"),
        }
    } else if flag(Transition::Add.as_str()) {
        "running".to_string()
    } else if flag(Transition::Remove.as_str()) {
        "removed".to_string()
    } else if flag(Transition::PrepareForAdd.as_str()) {
        "prepared".to_string()
    } else {
        format!("Unknown: {state}")
    };
    Some(formatted)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Branch-local expansion state; cloned for every child.
#[derive(Clone, Default)]
struct Memo {
    seen_types: Vec<String>,
    skip_required_ancestor_of: Option<DescriptorRef>,
    skip_subgraph_of: Option<DescriptorRef>,
}

impl Memo {
    fn has_seen(&self, type_name: &str) -> bool {
        self.seen_types.iter().any(|t| t.eq_ignore_ascii_case(type_name))
    }
}

struct Parent<'p> {
    id: &'p str,
    descriptor: &'p Descriptor,
    context: &'p ContextRef,
}

struct Expander<'r> {
    registry: &'r TypeRegistry,
    root_context: Map<String, Value>,
    nodes: HashMap<String, NodeEntry>,
    producers: HashMap<String, Vec<String>>,
    // last id each descriptor value was registered at
    landing: HashMap<*const Descriptor, String>,
}

fn is_same(slot: &Option<DescriptorRef>, descriptor: &DescriptorRef) -> bool {
    slot.as_ref().is_some_and(|d| Arc::ptr_eq(d, descriptor))
}

impl Expander<'_> {
    fn expand(
        &mut self,
        descriptor: DescriptorRef,
        parent: Option<&Parent<'_>>,
        segment: String,
        mut memo: Memo,
    ) -> Result<ExecutionNode> {

        if is_same(&memo.skip_required_ancestor_of, &descriptor) {
            memo.skip_required_ancestor_of = None;
        } else if let Some(required) = descriptor.required_ancestor() {
            if !memo.has_seen(&required) {
                let kind = self.registry.lookup(&required)?;
                debug!("Injecting {} above {}", required, descriptor.type_name());
                let ancestor = Descriptor::new(kind, Properties::new(), vec![Arc::clone(&descriptor)]);
                memo.skip_required_ancestor_of = Some(descriptor);
                return self.expand(ancestor, parent, segment, memo);
            }
        }

        let id = match parent {
            Some(parent) => format!("{}.{}", parent.id, segment),
            None => "0".to_string(),
        };

        if let Some(rewrite) = invert_properties(&descriptor) {
            debug!("Inverting properties of {} at {}", descriptor.type_name(), id);
            let node = self.expand(Arc::clone(&rewrite), parent, segment, memo)?;
            self.record_producers(&rewrite)?;
            // an inverted producer answers through its rewritten copy
            let inner = rewrite.children().last().and_then(|wrapper| wrapper.children().first());
            if let Some(landed) = inner.and_then(|owner| self.landing.get(&Arc::as_ptr(owner)).cloned()) {
                self.landing.insert(Arc::as_ptr(&descriptor), landed);
            }
            return Ok(node);
        }

        let context = self.create_context(&descriptor, &id, parent);
        self.landing.insert(Arc::as_ptr(&descriptor), id.clone());
        self.nodes.insert(
            id.clone(),
            NodeEntry {
                descriptor: Arc::clone(&descriptor),
                context: Arc::clone(&context),
            },
        );

        if is_same(&memo.skip_subgraph_of, &descriptor) {
            // the substituted descriptor itself, inside its own subgraph
            memo.skip_subgraph_of = None;
        } else if let Some(subgraph) = descriptor.subgraph() {
            debug!("Substituting subgraph for {} at {}", descriptor.type_name(), id);
            let mut sub_memo = memo.clone();
            sub_memo.skip_subgraph_of = Some(Arc::clone(&descriptor));
            let scope = Parent {
                id: &id,
                descriptor: &descriptor,
                context: &context,
            };
            return self.expand(subgraph, Some(&scope), SUBGRAPH.to_string(), sub_memo);
        }

        let type_name = descriptor.type_name().to_string();
        memo.seen_types.push(type_name.clone());

        let scope = Parent {
            id: &id,
            descriptor: &descriptor,
            context: &context,
        };
        let children = descriptor
            .children()
            .iter()
            .enumerate()
            .map(|(i, child)| self.expand(Arc::clone(child), Some(&scope), i.to_string(), memo.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(ExecutionNode {
            id,
            descriptor,
            type_name,
            children,
        })
    }

    fn create_context(&self, descriptor: &Descriptor, id: &str, parent: Option<&Parent<'_>>) -> ContextRef {
        let mut values = match parent {
            Some(parent) => parent.descriptor.child_context(parent.context),
            None => Map::new(),
        };
        values.extend(self.root_context.clone());
        values.extend(descriptor.initial_context());

        match parent {
            Some(parent) => Context::child(id, values, parent.context),
            None => Context::root(id, values),
        }
    }

    fn record_producers(&mut self, rewrite: &Descriptor) -> Result<()> {
        let Some((owner, producers)) = rewrite.children().split_last() else {
            return Ok(());
        };
        let Some(owner_id) = self.landing.get(&Arc::as_ptr(owner)).cloned() else {
            return Ok(());
        };
        let ids = producers
            .iter()
            .map(|p| {
                self.landing.get(&Arc::as_ptr(p)).cloned().ok_or_else(|| {
                    EngineError::UnknownNode(format!("producer {} of {}", p.type_name(), owner_id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Producers for {}: {:?}", owner_id, ids);
        self.producers.insert(owner_id, ids);
        Ok(())
    }
}
