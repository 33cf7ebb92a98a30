//! Plugin System for TempestSDR sources
//!
//! This module turns a source name into a loaded native module:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  register_source! ──▶ inventory ──▶ SourceRegistry (DashMap)     │
//! │  lookup(name) ──▶ PluginResolver ──▶ ModuleLoader ──▶ PluginHandle│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Declaring a Source
//!
//! ```ignore
//! use tsdr_sources::register_source;
//!
//! register_source!("Soapy", "TSDRPlugin_Soapy", false);
//! ```
//!
//! # Loading a Module
//!
//! ```ignore
//! use tsdr_sources::plugin::{global_registry, DynamicLoader, ModuleLoader, PluginResolver};
//!
//! let descriptor = global_registry().lookup("Soapy")?;
//! let path = PluginResolver::from_config(&config).resolve_descriptor(&descriptor)?;
//! let handle = DynamicLoader::new().load(descriptor.module_id(), &path)?;
//! ```

pub mod builtin;
pub mod descriptor;
pub mod dynamic_loader;
pub mod handle;
pub mod isolation;
pub mod lifecycle;
#[macro_use]
pub mod macros;
pub mod registry;
pub mod resolver;

// Re-exports for convenience
pub use descriptor::{Bounds, SourceCapabilities, SourceDescriptor};
pub use dynamic_loader::{DynamicLoader, ModuleLoader};
pub use handle::{NativeModule, PluginHandle, SampleSink, loaded_module_count};
pub use isolation::guard_native_call;
pub use lifecycle::{SourceState, StreamCounters, StreamStats};
pub use registry::{SourceConstructor, SourceRegistry, global_registry};
pub use resolver::{PluginResolver, application_dir};
