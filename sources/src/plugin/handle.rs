//! Plugin Handle
//!
//! A [`PluginHandle`] is the exclusive owner of one loaded native module.
//! The module is reached through the [`NativeModule`] trait so the streaming
//! layer never touches raw symbols; [`DynamicLoader`](super::DynamicLoader)
//! provides the shared-library implementation.
//!
//! Dropping the handle releases the module. The number of handles currently
//! alive is reported by [`loaded_module_count`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tsdr_plugin_api::StatusCode;

use crate::errors::{SourceError, SourceResult};

static LIVE_HANDLES: AtomicUsize = AtomicUsize::new(0);

/// Number of plugin handles currently alive in this process
pub fn loaded_module_count() -> usize {
    LIVE_HANDLES.load(Ordering::SeqCst)
}

/// Receiver for samples produced by a module's read loop
///
/// Called on the thread running [`NativeModule::read_async`].
pub trait SampleSink {
    /// `interleaved` holds I/Q float pairs; `dropped` counts samples the
    /// module discarded before this block
    fn on_samples(&mut self, interleaved: &[f32], dropped: u64);
}

/// Entry points of a loaded native module
///
/// Mirrors the native ABI one call per method. Optional entry points return
/// `None` when the module does not export them. `read_async` blocks until
/// `stop` is called from another thread, so implementations must be `Sync`.
pub trait NativeModule: Send + Sync {
    /// Name reported by the module itself
    fn plugin_name(&self) -> Option<String>;

    /// Packed ABI version the module was built against
    fn api_version(&self) -> Option<u32>;

    fn init(&self, params: &str) -> StatusCode;

    /// Returns the rate actually applied, 0 on failure
    fn set_sample_rate(&self, rate: u32) -> u32;

    fn sample_rate(&self) -> Option<u32>;

    fn set_base_frequency(&self, frequency: u32) -> StatusCode;

    fn set_gain(&self, gain: f32) -> Option<StatusCode>;

    fn read_async(&self, sink: &mut dyn SampleSink) -> StatusCode;

    fn stop(&self) -> StatusCode;

    fn cleanup(&self);

    /// Human-readable text describing the module's last failure
    fn last_error(&self) -> Option<String>;

    /// Whether the module exports `symbol`
    fn exports(&self, symbol: &str) -> bool;
}

/// Exclusive owner of one loaded native module
pub struct PluginHandle {
    module_id: String,
    path: PathBuf,
    module: Arc<dyn NativeModule>,
}

impl PluginHandle {
    pub fn new(module_id: impl Into<String>, path: impl Into<PathBuf>, module: Arc<dyn NativeModule>) -> Self {
        let handle = Self {
            module_id: module_id.into(),
            path: path.into(),
            module,
        };
        LIVE_HANDLES.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            module_id = %handle.module_id,
            path = %handle.path.display(),
            "Native module loaded"
        );
        handle
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn module(&self) -> &Arc<dyn NativeModule> {
        &self.module
    }

    /// Fail with `SymbolMissing` unless the module exports `symbol`
    pub fn require_symbol(&self, symbol: &str) -> SourceResult<()> {
        if self.module.exports(symbol) {
            Ok(())
        } else {
            Err(SourceError::SymbolMissing {
                module_id: self.module_id.clone(),
                symbol: symbol.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("module_id", &self.module_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        LIVE_HANDLES.fetch_sub(1, Ordering::SeqCst);
        tracing::info!(module_id = %self.module_id, "Native module released");
    }
}
