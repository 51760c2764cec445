//! The player: owns kinds, handlers and the current tree, and drives
//! transitions through them.

use crate::command::CommandNode;
use crate::dispatcher::Dispatcher;
use crate::layer::{core_layer, Layer};
use crate::notation;
use crate::registry::TypeRegistry;
use crate::tree::{DebugState, DryadTree};
use canopy_core::{
    ActionMap, Context, ContextRef, ContextUpdate, ContextUpdater, DescriptorRef, EngineError, KindRef,
    Properties, Result, Session, SessionRef, Transition, UpdaterRef,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Transition name recorded for out-of-band commands.
pub const CALL_COMMAND: &str = "callCommand";

/// Configuration for a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Values seeded into every node's context
    pub root_context: Map<String, Value>,
    /// Log the play graph and debug state when a transition fails
    pub dump_on_error: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            root_context: Map::new(),
            dump_on_error: true,
        }
    }
}

impl PlayerConfig {
    /// Set one root context value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.root_context.insert(key.into(), value.into());
        self
    }

    /// Set whether failures dump the tree.
    pub fn with_dump_on_error(mut self, dump_on_error: bool) -> Self {
        self.dump_on_error = dump_on_error;
        self
    }
}

/// Plays a descriptor tree: prepare, add and remove.
///
/// ```text
/// set_root → prepare → add → ... → remove
/// ```
///
/// The player does not serialize transitions; callers sequence them.
pub struct Player {
    config: PlayerConfig,
    registry: TypeRegistry,
    dispatcher: Arc<Dispatcher>,
    tree: Option<Arc<DryadTree>>,
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Player {
    /// Create a player with the core layer installed.
    pub fn new(config: PlayerConfig) -> Self {
        let mut player = Self {
            config,
            registry: TypeRegistry::new(),
            dispatcher: Arc::new(Dispatcher::default()),
            tree: None,
        };
        player.use_layer(core_layer());
        player
    }

    /// Current configuration.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Register a layer's handlers and kinds.
    pub fn use_layer(&mut self, layer: Layer) -> &mut Self {
        Arc::make_mut(&mut self.dispatcher).use_handlers(layer.handlers);
        self.registry.register_all(layer.kinds);
        self
    }

    /// Register one kind.
    pub fn add_kind(&mut self, kind: KindRef) -> &mut Self {
        self.registry.register(kind);
        self
    }

    /// Registered kinds.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Registered handler names, in dispatch order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.dispatcher.handler_names()
    }

    /// Expand and install a new root.
    ///
    /// On failure the previous tree stays installed.
    pub fn set_root(&mut self, root: DescriptorRef) -> Result<()> {
        let tree = DryadTree::new(root, &self.registry, self.config.root_context.clone())?;
        info!("Installed root {} ({} nodes)", tree.root().type_name, tree.node_count());
        self.tree = Some(Arc::new(tree));
        Ok(())
    }

    /// Compile a literal notation document and install it as the root.
    pub fn set_root_document(&mut self, document: &Value) -> Result<()> {
        let root = notation::compile(document, &self.registry)?;
        self.set_root(root)
    }

    /// Remove the current tree.
    pub fn clear_root(&mut self) {
        self.tree = None;
    }

    /// The current tree.
    pub fn tree(&self) -> Option<&Arc<DryadTree>> {
        self.tree.as_ref()
    }

    /// Session view of the current tree, as handed to lifecycle hooks.
    pub fn session(&self) -> Option<SessionRef> {
        self.tree.as_ref().map(|tree| self.session_for(tree))
    }

    fn session_for(&self, tree: &Arc<DryadTree>) -> SessionRef {
        Arc::new(TreeSession {
            tree: Arc::clone(tree),
            dispatcher: Arc::clone(&self.dispatcher),
        })
    }

    /// Run `prepareForAdd`.
    pub async fn prepare(&self) -> Result<()> {
        self.call(Transition::PrepareForAdd.as_str()).await
    }

    /// Prepare, then add.
    pub async fn play(&self) -> Result<()> {
        let outcome = match self.prepare().await {
            Ok(()) => self.call(Transition::Add.as_str()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            self.report("Failed to play", err);
        }
        outcome
    }

    /// Run `remove`.
    pub async fn stop(&self) -> Result<()> {
        let outcome = self.call(Transition::Remove.as_str()).await;
        if let Err(err) = &outcome {
            self.report("Failed to stop", err);
        }
        outcome
    }

    /// Collect and execute one transition by name.
    pub async fn call(&self, transition: &str) -> Result<()> {
        let transition: Transition = transition.parse()?;
        info!("Calling {}", transition);
        let commands = self.collect_command_tree(transition)?;
        self.execute(&commands, transition.as_str()).await
    }

    /// Ask every node of the current tree for its actions in `transition`.
    ///
    /// Without a tree this is a single no-op command.
    pub fn collect_command_tree(&self, transition: Transition) -> Result<CommandNode> {
        match &self.tree {
            Some(tree) => tree.collect_command_tree(transition, &self.session_for(tree)),
            None => Ok(CommandNode::new(
                ActionMap::new(),
                Context::root("", Map::new()),
                Properties::new(),
                "",
                Vec::new(),
            )),
        }
    }

    /// Execute a command tree through the dispatcher.
    pub async fn execute(&self, commands: &CommandNode, transition: &str) -> Result<()> {
        let Some(tree) = &self.tree else {
            debug!("No tree installed; skipping {}", transition);
            return Ok(());
        };
        let updater: UpdaterRef = Arc::new(TreeUpdater {
            tree: Arc::clone(tree),
        });
        let outcome = commands.call(transition, &self.dispatcher, &updater).await;
        if let Err(err) = &outcome {
            error!("{} failed: {}", transition, err);
        }
        outcome
    }

    /// Execute `actions` against node `node_id` outside the transition flow.
    pub async fn call_command(&self, node_id: &str, actions: ActionMap) -> Result<()> {
        match self.session() {
            Some(session) => session.call_command(node_id, actions).await,
            None => Ok(()),
        }
    }

    /// Merge `update` into node `node_id`'s context.
    pub fn update_context(&self, node_id: &str, update: ContextUpdate) -> Result<()> {
        match &self.tree {
            Some(tree) => tree.update_context(node_id, update),
            None => Ok(()),
        }
    }

    /// Context of node `node_id`.
    pub fn context(&self, node_id: &str) -> Option<ContextRef> {
        self.tree.as_ref().and_then(|tree| tree.context(node_id))
    }

    /// Per-node state of the current tree.
    pub fn debug_state(&self) -> Option<DebugState> {
        self.tree.as_ref().map(|tree| tree.debug_state())
    }

    /// The expanded tree in literal notation.
    pub fn play_graph(&self) -> Option<Value> {
        self.tree.as_ref().map(|tree| tree.play_graph())
    }

    /// Log the play graph and debug state.
    pub fn dump(&self) {
        let graph = self.play_graph().unwrap_or(Value::Null);
        info!("Play graph:\n{}", serde_json::to_string_pretty(&graph).unwrap_or_default());
        let state = self
            .debug_state()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(Value::Null);
        error!("Debug state:\n{}", serde_json::to_string_pretty(&state).unwrap_or_default());
    }

    fn report(&self, message: &str, err: &EngineError) {
        error!("{}: {}", message, err);
        if self.config.dump_on_error {
            self.dump();
        }
    }
}

/// Writes handler updates into the tree's node contexts.
struct TreeUpdater {
    tree: Arc<DryadTree>,
}

impl ContextUpdater for TreeUpdater {
    fn update(&self, context: &Context, update: ContextUpdate) {
        trace!("Context update for {}", context.id());
        if self.tree.update_context(context.id(), update.clone()).is_err() {
            context.merge(update);
        }
    }
}

/// The current tree plus the dispatcher, as seen by lifecycle hooks.
struct TreeSession {
    tree: Arc<DryadTree>,
    dispatcher: Arc<Dispatcher>,
}

impl Session for TreeSession {
    fn descriptor(&self, id: &str) -> Option<DescriptorRef> {
        self.tree.descriptor(id)
    }

    fn context(&self, id: &str) -> Option<ContextRef> {
        self.tree.context(id)
    }

    fn producer_ids(&self, owner_id: &str) -> Vec<String> {
        self.tree.producer_ids(owner_id)
    }

    fn call_command(&self, id: &str, actions: ActionMap) -> BoxFuture<'static, Result<()>> {
        let tree = Arc::clone(&self.tree);
        let dispatcher = Arc::clone(&self.dispatcher);
        let id = id.to_string();
        async move {
            debug!("Out-of-band command for {}", id);
            let command = tree.make_command_tree(&id, actions)?;
            let updater: UpdaterRef = Arc::new(TreeUpdater { tree });
            command.call(CALL_COMMAND, &dispatcher, &updater).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{Descriptor, PropValue, ResourceKind};
    use serde_json::json;

    struct TypeA;

    impl ResourceKind for TypeA {
        fn type_name(&self) -> &str {
            "TypeA"
        }

        fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
            ActionMap::new().run(|_| async { Ok(()) })
        }
    }

    struct TypeB;

    impl ResourceKind for TypeB {
        fn type_name(&self) -> &str {
            "TypeB"
        }
    }

    /// Records its resolved properties as `seen` when added.
    struct Owner;

    impl ResourceKind for Owner {
        fn type_name(&self) -> &str {
            "Owner"
        }

        fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
            ActionMap::new().run(|args| async move {
                let seen = Value::Object(args.properties.clone());
                args.updater.update(&args.context, ContextUpdate::new().set("seen", seen));
                Ok(())
            })
        }
    }

    struct ValueProducer;

    impl ResourceKind for ValueProducer {
        fn type_name(&self) -> &str {
            "ValueProducer"
        }

        fn resolved_value(&self, _node: &Descriptor, _context: &Context) -> Result<Value> {
            Ok(json!(1))
        }
    }

    /// Resolves to its `value` property.
    struct Constant;

    impl ResourceKind for Constant {
        fn type_name(&self) -> &str {
            "Constant"
        }

        fn resolved_value(&self, node: &Descriptor, context: &Context) -> Result<Value> {
            node.property("value").map_or(Ok(Value::Null), |v| v.resolve(context))
        }
    }

    /// Resolves to its `inner` property, which is usually another producer.
    struct Relay;

    impl ResourceKind for Relay {
        fn type_name(&self) -> &str {
            "Relay"
        }

        fn resolved_value(&self, node: &Descriptor, context: &Context) -> Result<Value> {
            node.property("inner").map_or(Ok(Value::Null), |v| v.resolve(context))
        }
    }

    struct Failing;

    impl ResourceKind for Failing {
        fn type_name(&self) -> &str {
            "Failing"
        }

        fn activate_actions(&self, _node: &Descriptor, _session: &SessionRef) -> ActionMap {
            ActionMap::new().run(|_| async { anyhow::bail!("testing failure") })
        }
    }

    /// Sends a follow-up command to itself while running.
    struct Callback;

    impl ResourceKind for Callback {
        fn type_name(&self) -> &str {
            "Callback"
        }

        fn activate_actions(&self, _node: &Descriptor, session: &SessionRef) -> ActionMap {
            let session = Arc::clone(session);
            ActionMap::new().run(move |args| {
                let session = Arc::clone(&session);
                async move {
                    let mut update = Map::new();
                    update.insert("called".into(), json!(true));
                    session
                        .call_command(args.context.id(), ActionMap::new().update_context(update))
                        .await?;
                    Ok(())
                }
            })
        }
    }

    fn player() -> Player {
        let mut player = Player::new(PlayerConfig::default().with_dump_on_error(false));
        player.use_layer(
            Layer::new()
                .with_kind(Arc::new(TypeA))
                .with_kind(Arc::new(TypeB))
                .with_kind(Arc::new(Owner))
                .with_kind(Arc::new(ValueProducer)),
        );
        player
    }

    fn state(player: &Player, id: &str) -> Value {
        player.context(id).and_then(|c| c.get_local("state")).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_add_with_default_actions() {
        let mut player = player();
        player
            .set_root(Descriptor::new(Arc::new(TypeA), Properties::new(), vec![Descriptor::leaf(Arc::new(TypeB))]))
            .unwrap();

        player.call("add").await.unwrap();

        assert_eq!(state(&player, "0"), json!({"add": true}));
        assert_eq!(state(&player, "0.0"), json!({"add": true}));
    }

    #[tokio::test]
    async fn test_dependency_inversion_round_trip() {
        let mut player = player();
        player
            .set_root_document(&json!(["owner", {"producer": ["valueproducer", {}], "level": 2}]))
            .unwrap();

        player.play().await.unwrap();

        let owner = player.context("0.1.0").unwrap();
        assert_eq!(owner.get_local("seen"), Some(json!({"producer": 1, "level": 2})));
        assert_eq!(player.context("0.1").unwrap().get_local("resolvedValues"), Some(json!([1])));
        let debug = player.debug_state().unwrap();
        assert_eq!(debug.children[1].children[0].state.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_nested_producers_resolve_in_order() {
        let mut player = player();
        player.add_kind(Arc::new(Constant));
        player.add_kind(Arc::new(Relay));
        player
            .set_root_document(&json!(["owner", {
                "a": ["relay", {"inner": ["constant", {"value": 7}]}],
                "b": ["constant", {"value": 2}]
            }]))
            .unwrap();

        player.play().await.unwrap();

        assert_eq!(player.context("0.0.1").unwrap().get_local("resolvedValues"), Some(json!([7])));
        assert_eq!(player.context("0.2").unwrap().get_local("resolvedValues"), Some(json!([7, 2])));
        let owner = player.context("0.2.0").unwrap();
        assert_eq!(owner.get_local("seen"), Some(json!({"a": 7, "b": 2})));
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let mut player = player();
        player.add_kind(Arc::new(Failing));
        player.set_root(Descriptor::leaf(Arc::new(Failing))).unwrap();

        let err = player.play().await.unwrap_err();

        assert_eq!(err.node(), Some("0"));
        let state = state(&player, "0");
        assert_eq!(state["add"], json!(false));
        assert!(state["error"].as_str().unwrap().contains("testing failure"));
        assert!(player.debug_state().unwrap().state.unwrap().starts_with("ERROR: "));
    }

    #[tokio::test]
    async fn test_call_command_from_run() {
        let mut player = player();
        player.set_root(Descriptor::leaf(Arc::new(Callback))).unwrap();

        player.play().await.unwrap();

        let context = player.context("0").unwrap();
        assert_eq!(context.get("called"), Some(json!(true)));
        assert_eq!(state(&player, "0"), json!({"add": true}));
    }

    #[tokio::test]
    async fn test_out_of_band_command_for_unknown_node() {
        let mut player = player();
        player.set_root(Descriptor::leaf(Arc::new(TypeB))).unwrap();
        let err = player.call_command("0.7", ActionMap::new()).await.unwrap_err();
        assert_eq!(err, EngineError::UnknownNode("0.7".into()));
    }

    #[tokio::test]
    async fn test_unsupported_transition() {
        let player = player();
        let err = player.call("explode").await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedTransition(_)));
    }

    #[tokio::test]
    async fn test_stop_after_play() {
        let mut player = player();
        player.set_root(Descriptor::leaf(Arc::new(TypeA))).unwrap();
        player.play().await.unwrap();
        player.stop().await.unwrap();
        assert_eq!(player.debug_state().unwrap().state.as_deref(), Some("removed"));
    }

    #[tokio::test]
    async fn test_no_root_is_a_no_op() {
        let player = player();
        player.play().await.unwrap();
        assert!(player.debug_state().is_none());
        assert!(player.play_graph().is_none());
    }

    #[test]
    fn test_failed_set_root_keeps_previous_tree() {
        let mut player = player();
        player.set_root(Descriptor::leaf(Arc::new(TypeB))).unwrap();

        let err = player.set_root_document(&json!(["missing", {}])).unwrap_err();

        assert!(matches!(err, EngineError::UnregisteredType { .. }));
        assert_eq!(player.tree().unwrap().root().type_name, "TypeB");
    }

    #[test]
    fn test_root_context_reaches_every_node() {
        let mut player = Player::new(PlayerConfig::default().with_context("log", "quiet"));
        player.add_kind(Arc::new(TypeB));
        player
            .set_root(Descriptor::new(Arc::new(TypeB), Properties::new(), vec![Descriptor::leaf(Arc::new(TypeB))]))
            .unwrap();
        assert_eq!(player.context("0.0").unwrap().get_local("log"), Some(json!("quiet")));
    }

    #[test]
    fn test_config_from_json() {
        let config: PlayerConfig = serde_json::from_value(json!({"root_context": {"a": 1}})).unwrap();
        assert!(config.dump_on_error);
        assert_eq!(config.root_context.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_play_graph() {
        let mut player = player();
        player
            .set_root(
                Descriptor::builder(Arc::new(Owner))
                    .property("producer", PropValue::from(Descriptor::leaf(Arc::new(ValueProducer))))
                    .build(),
            )
            .unwrap();
        let graph = player.play_graph().unwrap();
        assert_eq!(graph[0], json!("Properties"));
        assert_eq!(graph[2][1][2][0], json!(["Owner", {"producer": "<accessor>"}, []]));
    }
}
