//! Type registry: resolves kind names for required ancestors and literal notation.

use crate::properties::{PROPERTIES, PROPERTIES_OWNER};
use canopy_core::{EngineError, KindRef, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Append-only registry of resource kinds, keyed case-insensitively.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    kinds: BTreeMap<String, KindRef>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind under its type name.
    ///
    /// The dependency inversion wrapper names are reserved and ignored.
    pub fn register(&mut self, kind: KindRef) {
        let name = kind.type_name().to_string();
        if name == PROPERTIES || name == PROPERTIES_OWNER {
            warn!("Ignoring registration of reserved type name: {}", name);
            return;
        }
        debug!("Registering kind: {}", name);
        self.kinds.insert(name.to_lowercase(), kind);
    }

    /// Register several kinds.
    pub fn register_all(&mut self, kinds: impl IntoIterator<Item = KindRef>) {
        for kind in kinds {
            self.register(kind);
        }
    }

    /// Look up a kind by name, ignoring case.
    pub fn lookup(&self, name: &str) -> Result<KindRef> {
        self.kinds
            .get(&name.to_lowercase())
            .map(Arc::clone)
            .ok_or_else(|| EngineError::UnregisteredType {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    /// Whether a kind with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(&name.to_lowercase())
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.values().map(|k| k.type_name().to_string()).collect();
        names.sort();
        names
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
