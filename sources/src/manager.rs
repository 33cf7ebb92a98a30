//! Source Manager
//!
//! Entry point for callers: enumerates the registry and opens sources by
//! name. Opening wires the pieces together:
//!
//! ```text
//! open(name) ─▶ SourceRegistry::lookup ─▶ PluginResolver::resolve_descriptor
//!            ─▶ ModuleLoader::load ─▶ StreamingSource (state: created)
//! ```
//!
//! Every failure along the way releases whatever was already acquired before
//! the error is returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tsdr_plugin_api::SYMBOL_GET_SAMPLE_RATE;

use crate::config::LoaderConfig;
use crate::errors::SourceResult;
use crate::plugin::descriptor::SourceDescriptor;
use crate::plugin::dynamic_loader::{DynamicLoader, ModuleLoader};
use crate::plugin::registry::{SourceRegistry, global_registry};
use crate::plugin::resolver::PluginResolver;
use crate::source::{StreamOptions, StreamingSource};

/// Opens named sources against a registry, resolver and loader
pub struct SourceManager {
    registry: Arc<SourceRegistry>,
    resolver: PluginResolver,
    loader: Arc<dyn ModuleLoader>,
    options: StreamOptions,
    source_params: HashMap<String, String>,
}

impl SourceManager {
    /// Manager over the global registry with default configuration
    pub fn new() -> Self {
        Self::from_config(&LoaderConfig::default())
    }

    /// Manager over the global registry, searching and buffering as
    /// configured
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            registry: global_registry(),
            resolver: PluginResolver::from_config(config),
            loader: Arc::new(DynamicLoader::new()),
            options: config.stream_options(),
            source_params: config.source_params.clone(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_resolver(mut self, resolver: PluginResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Init parameters used for `name` instead of the descriptor default
    pub fn with_init_params(mut self, name: impl Into<String>, params: impl Into<String>) -> Self {
        self.source_params.insert(name.into(), params.into());
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &PluginResolver {
        &self.resolver
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// All registered sources in registration order
    pub fn list_sources(&self) -> Vec<Arc<SourceDescriptor>> {
        self.registry.list()
    }

    /// Find the library that would be loaded for `name`
    pub fn resolve(&self, name: &str) -> SourceResult<(Arc<SourceDescriptor>, PathBuf)> {
        let descriptor = self.registry.lookup(name)?;
        let path = self.resolver.resolve_descriptor(&descriptor)?;
        Ok((descriptor, path))
    }

    /// Load the module behind `name` and wrap it in a streaming source
    ///
    /// The returned source is in `Created`; call `init()` next.
    pub fn open(&self, name: &str) -> SourceResult<StreamingSource> {
        let (descriptor, path) = self.resolve(name)?;
        let handle = self.loader.load(descriptor.module_id(), &path)?;

        if descriptor.supports_sample_rate_query() {
            handle.require_symbol(SYMBOL_GET_SAMPLE_RATE)?;
        }

        let source = StreamingSource::new(descriptor, handle, self.options);
        let source = match self.source_params.get(name) {
            Some(params) => source.with_init_params(params.clone()),
            None => source,
        };

        tracing::info!(name, module_id = %source.module_id(), "Source opened");
        Ok(source)
    }

    /// Like [`open`](Self::open), for sources shared between threads or
    /// read with `read_async`
    pub fn open_shared(&self, name: &str) -> SourceResult<Arc<StreamingSource>> {
        self.open(name).map(Arc::new)
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceManager")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
