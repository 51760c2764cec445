//! Canopy core data model.
//!
//! Descriptors, contexts, property values and action maps shared by the
//! expansion and execution engine.

#![warn(missing_docs)]

mod action;
mod context;
mod descriptor;
mod error;
mod session;
mod value;

pub use action::{
    Action, ActionMap, CallOrder, DeferredFn, Pending, PendingUpdate, RunArgs, RunFn, Transition,
    UpdateFn, CALL_ORDER, RUN, UPDATE_CONTEXT,
};
pub use context::{
    Context, ContextRef, ContextUpdate, ContextUpdater, DirectUpdater, UpdaterRef, ID_KEY, STATE_KEY,
};
pub use descriptor::{Descriptor, DescriptorBuilder, DescriptorExt, DescriptorRef, KindRef, ResourceKind};
pub use error::{EngineError, Result};
pub use session::{Session, SessionRef};
pub use value::{
    properties_from_json, resolve_properties, Accessor, PropValue, Properties, ResolvedProperties,
};
