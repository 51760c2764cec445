//! Error type shared by expansion and execution.

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while expanding or executing a resource tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A value that is not a resource descriptor reached a position expecting one
    #[error("Not a descriptor: {0}")]
    NotADescriptor(String),

    /// A type name has no registered implementation
    #[error("Type not registered: '{name}' (known types: {known})")]
    UnregisteredType {
        /// Requested name
        name: String,
        /// Comma separated list of registered names
        known: String,
    },

    /// The `callOrder` entry of an action map is not a known mode
    #[error("callOrder mode not recognized: {0}")]
    InvalidCallOrder(String),

    /// Transition name is not one of prepareForAdd, add, remove
    #[error("Unsupported transition: {0}")]
    UnsupportedTransition(String),

    /// A property accessor ran before its producer populated the resolved values
    #[error("Missing resolved value {index} in context {node}")]
    MissingResolvedValue {
        /// Id of the node whose context was read
        node: String,
        /// Index of the embedded descriptor
        index: usize,
    },

    /// A kind used as a property value does not provide a resolved value
    #[error("{0} does not implement resolved_value")]
    NoResolvedValue(String),

    /// No node with this id exists in the current tree
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A registered handler failed
    #[error("{handler} failed: {message}")]
    HandlerFailure {
        /// Handler name
        handler: String,
        /// Failure message, including any context chain
        message: String,
    },

    /// Failure annotated with the id of the node it happened in
    #[error("{source} in {node}")]
    AtNode {
        /// Node id
        node: String,
        /// Underlying failure
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Wrap a handler error, keeping the full `anyhow` chain in the message.
    pub fn handler(handler: impl Into<String>, err: anyhow::Error) -> Self {
        Self::HandlerFailure {
            handler: handler.into(),
            message: format!("{err:#}"),
        }
    }

    /// Annotate this error with the id of the failing node.
    pub fn at_node(self, node: impl Into<String>) -> Self {
        Self::AtNode {
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error with every node annotation removed.
    pub fn root(&self) -> &EngineError {
        match self {
            Self::AtNode { source, .. } => source.root(),
            other => other,
        }
    }

    /// Id of the innermost node this error was annotated with.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::AtNode { node, source } => source.node().or(Some(node.as_str())),
            _ => None,
        }
    }
}
