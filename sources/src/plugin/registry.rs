//! Source Registry
//!
//! Maps display names to source descriptors. Names are matched exactly and
//! case-sensitively in O(1) through a `DashMap`; enumeration follows
//! registration order so a UI can present the catalog as declared.
//!
//! Built-in backends register themselves at link time via `inventory`
//! (see [`register_source!`](crate::register_source)) and are collected the
//! first time [`global_registry`] is called.
//!
//! # Example
//!
//! ```ignore
//! use tsdr_sources::plugin::global_registry;
//!
//! let soapy = global_registry().lookup("Soapy")?;
//! assert_eq!(soapy.module_id(), "TSDRPlugin_Soapy");
//! ```

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::descriptor::SourceDescriptor;
use crate::errors::{SourceError, SourceResult};

/// Link-time registration record collected by `inventory`
///
/// The descriptor is produced lazily so registration stays a `const`
/// expression.
pub struct SourceConstructor {
    /// Native module identifier, used for diagnostics before the descriptor
    /// is built
    pub module_id: &'static str,

    /// Builds the descriptor
    pub descriptor_fn: fn() -> SourceDescriptor,
}

impl SourceConstructor {
    pub const fn new(module_id: &'static str, descriptor_fn: fn() -> SourceDescriptor) -> Self {
        Self {
            module_id,
            descriptor_fn,
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        (self.descriptor_fn)()
    }
}

inventory::collect!(SourceConstructor);

/// Registry of named sources
pub struct SourceRegistry {
    by_name: DashMap<String, Arc<SourceDescriptor>>,
    /// module_id -> display name
    module_ids: DashMap<String, String>,
    /// Registration order; also serializes writers
    order: RwLock<Vec<Arc<SourceDescriptor>>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            module_ids: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry holding every source submitted with
    /// `register_source!`
    ///
    /// A constructor that collides with an earlier one is skipped with a
    /// warning; link order decides which one wins.
    pub fn with_builtin_sources() -> Self {
        let registry = Self::new();
        for constructor in inventory::iter::<SourceConstructor> {
            if let Err(e) = registry.register(constructor.descriptor()) {
                tracing::warn!(
                    module_id = constructor.module_id,
                    error = %e,
                    "Skipping built-in source"
                );
            }
        }
        tracing::debug!(count = registry.len(), "Built-in sources registered");
        registry
    }

    /// Register a descriptor
    ///
    /// Fails with `DuplicateName` when either the display name or the module
    /// identifier is already taken. A rejected registration leaves the
    /// registry untouched.
    pub fn register(&self, descriptor: SourceDescriptor) -> SourceResult<Arc<SourceDescriptor>> {
        let mut order = self.order.write();

        if self.by_name.contains_key(descriptor.display_name())
            || self.module_ids.contains_key(descriptor.module_id())
        {
            return Err(SourceError::DuplicateName {
                name: descriptor.display_name().to_string(),
                module_id: descriptor.module_id().to_string(),
            });
        }

        let descriptor = Arc::new(descriptor);
        self.by_name
            .insert(descriptor.display_name().to_string(), descriptor.clone());
        self.module_ids.insert(
            descriptor.module_id().to_string(),
            descriptor.display_name().to_string(),
        );
        order.push(descriptor.clone());

        tracing::debug!(
            name = descriptor.display_name(),
            module_id = descriptor.module_id(),
            "Registered source"
        );
        Ok(descriptor)
    }

    /// Find a source by its exact display name
    pub fn lookup(&self, name: &str) -> SourceResult<Arc<SourceDescriptor>> {
        self.by_name
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SourceError::NotFound {
                name: name.to_string(),
            })
    }

    /// Find a source by native module identifier
    pub fn find_by_module(&self, module_id: &str) -> Option<Arc<SourceDescriptor>> {
        let name = self.module_ids.get(module_id)?.value().clone();
        self.by_name.get(&name).map(|entry| entry.value().clone())
    }

    /// All descriptors in registration order
    pub fn list(&self) -> Vec<Arc<SourceDescriptor>> {
        self.order.read().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .order
            .read()
            .iter()
            .map(|d| d.display_name().to_string())
            .collect();
        f.debug_struct("SourceRegistry")
            .field("sources", &names)
            .finish()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<SourceRegistry>> = OnceLock::new();

/// Get the process-wide registry
///
/// Lazily populated with the built-in sources on first access. Additional
/// sources may still be registered at runtime.
pub fn global_registry() -> Arc<SourceRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(SourceRegistry::with_builtin_sources()))
        .clone()
}
