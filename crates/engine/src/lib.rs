//! Canopy engine: expands descriptor trees and plays them through
//! prepare, add and remove.
//!
//! ```text
//! Descriptor ──expand──► DryadTree ──collect──► CommandNode ──call──► Dispatcher ──► handlers
//! ```

#![warn(missing_docs)]

mod command;
mod dispatcher;
pub mod handlers;
mod layer;
pub mod notation;
mod player;
mod properties;
mod registry;
mod tree;

pub use command::CommandNode;
pub use dispatcher::{Dispatcher, Handler, HandlerRef};
pub use handlers::{RunHandler, UpdateContextHandler};
pub use layer::{core_layer, Layer};
pub use player::{Player, PlayerConfig, CALL_COMMAND};
pub use properties::{
    invert_properties, resolved_value_at, PropertiesKind, PropertiesOwnerKind, PROPERTIES,
    PROPERTIES_OWNER, RESOLVED_VALUES,
};
pub use registry::TypeRegistry;
pub use tree::{DebugState, DryadTree, ExecutionNode, SUBGRAPH};
