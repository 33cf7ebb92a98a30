pub mod config;
pub mod errors;
pub mod manager;
pub mod plugin;
pub mod source;

// Re-export commonly used items for convenience
pub use config::{ConfigError, LoaderConfig};
pub use errors::{SourceError, SourceResult};
pub use manager::SourceManager;
pub use plugin::{
    SourceDescriptor, SourceRegistry, SourceState, StreamStats, global_registry,
    loaded_module_count,
};
pub use source::{Sample, StreamOptions, StreamingSource};
