//! Dynamic Module Loader
//!
//! Loads native source modules from shared libraries (.so on Linux, .dll on
//! Windows, .dylib on macOS) and exposes them as [`NativeModule`]s.
//!
//! # Loading Steps
//!
//! 1. Open the library with `libloading`
//! 2. Resolve every required entry point, failing on the first missing one
//! 3. Resolve the optional entry points that are present
//! 4. Check the module's ABI version against the host requirement
//!
//! Loading is all-or-nothing: when any step fails the library is unloaded
//! before the error is returned.
//!
//! # Safety
//!
//! Loading a library runs its initializers and calling its entry points runs
//! arbitrary native code. Only load modules from trusted directories.

use std::ffi::{CString, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use semver::{Comparator, Op, Prerelease, Version, VersionReq};
use tsdr_plugin_api::{
    PLUGIN_API_VERSION, SYMBOL_API_VERSION, SYMBOL_CLEANUP, SYMBOL_GET_NAME,
    SYMBOL_GET_SAMPLE_RATE, SYMBOL_INIT, SYMBOL_LAST_ERROR, SYMBOL_READ_ASYNC,
    SYMBOL_SET_BASE_FREQ, SYMBOL_SET_GAIN, SYMBOL_SET_SAMPLE_RATE, SYMBOL_STOP, StatusCode,
    TEXT_BUFFER_LEN, ffi, format_version, read_c_buffer, version_major, version_minor,
    version_patch,
};

use super::handle::{NativeModule, PluginHandle, SampleSink};
use super::isolation::guard_native_call;
use crate::errors::{SourceError, SourceResult};

/// Turns a resolved library path into a [`PluginHandle`]
pub trait ModuleLoader: Send + Sync {
    fn load(&self, module_id: &str, path: &Path) -> SourceResult<PluginHandle>;
}

/// Shared-library loader backed by `libloading`
#[derive(Debug, Clone)]
pub struct DynamicLoader {
    required: VersionReq,
}

impl DynamicLoader {
    /// Loader accepting modules with the host's ABI major version
    pub fn new() -> Self {
        Self::with_requirement(VersionReq {
            comparators: vec![Comparator {
                op: Op::Caret,
                major: u64::from(version_major(PLUGIN_API_VERSION)),
                minor: None,
                patch: None,
                pre: Prerelease::EMPTY,
            }],
        })
    }

    pub fn with_requirement(required: VersionReq) -> Self {
        Self { required }
    }

    pub fn requirement(&self) -> &VersionReq {
        &self.required
    }

    /// Check a packed module ABI version against the requirement
    pub fn check_version(&self, module_id: &str, packed: u32) -> SourceResult<()> {
        let version = Version::new(
            u64::from(version_major(packed)),
            u64::from(version_minor(packed)),
            u64::from(version_patch(packed)),
        );

        if !self.required.matches(&version) {
            return Err(SourceError::IncompatibleVersion {
                module_id: module_id.to_string(),
                required: self.required.to_string(),
                found: format_version(packed),
            });
        }

        Ok(())
    }
}

impl Default for DynamicLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for DynamicLoader {
    fn load(&self, module_id: &str, path: &Path) -> SourceResult<PluginHandle> {
        tracing::info!(module_id, path = %path.display(), "Loading native module");

        // SAFETY: running library initializers is inherent to loading a module
        let library = unsafe { Library::new(path) }.map_err(|e| SourceError::Load {
            module_id: module_id.to_string(),
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let entry = EntryPoints::resolve(&library, module_id)?;
        let module = LibraryModule { entry, _library: library };

        match guard_native_call(module_id, "getapiversion", || module.api_version())? {
            Some(packed) => self.check_version(module_id, packed)?,
            None => tracing::debug!(module_id, "Module exports no ABI version, assuming 1.0.0"),
        }

        if let Some(name) = guard_native_call(module_id, "getName", || module.plugin_name())? {
            tracing::debug!(module_id, plugin_name = %name, "Module identified itself");
        }

        Ok(PluginHandle::new(module_id, path, Arc::new(module)))
    }
}

/// Function pointers copied out of a loaded library
///
/// Only valid while the owning [`Library`] is alive.
#[derive(Clone, Copy)]
struct EntryPoints {
    init: ffi::InitFn,
    read_async: ffi::ReadAsyncFn,
    stop: ffi::StopFn,
    set_base_freq: ffi::SetBaseFreqFn,
    set_sample_rate: ffi::SetSampleRateFn,
    cleanup: ffi::CleanupFn,
    get_name: Option<ffi::GetNameFn>,
    get_sample_rate: Option<ffi::GetSampleRateFn>,
    set_gain: Option<ffi::SetGainFn>,
    last_error: Option<ffi::LastErrorFn>,
    api_version: Option<ffi::ApiVersionFn>,
}

impl EntryPoints {
    fn resolve(library: &Library, module_id: &str) -> SourceResult<Self> {
        Ok(Self {
            init: required(library, module_id, SYMBOL_INIT)?,
            read_async: required(library, module_id, SYMBOL_READ_ASYNC)?,
            stop: required(library, module_id, SYMBOL_STOP)?,
            set_base_freq: required(library, module_id, SYMBOL_SET_BASE_FREQ)?,
            set_sample_rate: required(library, module_id, SYMBOL_SET_SAMPLE_RATE)?,
            cleanup: required(library, module_id, SYMBOL_CLEANUP)?,
            get_name: optional(library, SYMBOL_GET_NAME),
            get_sample_rate: optional(library, SYMBOL_GET_SAMPLE_RATE),
            set_gain: optional(library, SYMBOL_SET_GAIN),
            last_error: optional(library, SYMBOL_LAST_ERROR),
            api_version: optional(library, SYMBOL_API_VERSION),
        })
    }
}

fn required<T: Copy>(library: &Library, module_id: &str, symbol: &str) -> SourceResult<T> {
    optional(library, symbol).ok_or_else(|| {
        tracing::warn!(module_id, symbol, "Required symbol missing");
        SourceError::SymbolMissing {
            module_id: module_id.to_string(),
            symbol: symbol.to_string(),
        }
    })
}

fn optional<T: Copy>(library: &Library, symbol: &str) -> Option<T> {
    // SAFETY: T is one of the ffi function pointer types matching the symbol
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .ok()
        .map(|sym| *sym)
}

/// A native module living in a shared library
struct LibraryModule {
    entry: EntryPoints,
    // Dropped last: the entry points point into this library
    _library: Library,
}

impl NativeModule for LibraryModule {
    fn plugin_name(&self) -> Option<String> {
        let get_name = self.entry.get_name?;
        let mut buffer = [0 as c_char; TEXT_BUFFER_LEN];
        // SAFETY: buffer holds TEXT_BUFFER_LEN bytes as the ABI requires
        unsafe { get_name(buffer.as_mut_ptr()) };
        read_c_buffer(&buffer)
    }

    fn api_version(&self) -> Option<u32> {
        let api_version = self.entry.api_version?;
        // SAFETY: no arguments
        Some(unsafe { api_version() })
    }

    fn init(&self, params: &str) -> StatusCode {
        let Ok(params) = CString::new(params) else {
            return StatusCode::PluginParametersWrong;
        };
        // SAFETY: params outlives the call
        StatusCode::from_code(unsafe { (self.entry.init)(params.as_ptr()) })
    }

    fn set_sample_rate(&self, rate: u32) -> u32 {
        // SAFETY: plain value argument
        unsafe { (self.entry.set_sample_rate)(rate) }
    }

    fn sample_rate(&self) -> Option<u32> {
        let get_sample_rate = self.entry.get_sample_rate?;
        // SAFETY: no arguments
        Some(unsafe { get_sample_rate() })
    }

    fn set_base_frequency(&self, frequency: u32) -> StatusCode {
        // SAFETY: plain value argument
        StatusCode::from_code(unsafe { (self.entry.set_base_freq)(frequency) })
    }

    fn set_gain(&self, gain: f32) -> Option<StatusCode> {
        let set_gain = self.entry.set_gain?;
        // SAFETY: plain value argument
        Some(StatusCode::from_code(unsafe { set_gain(gain) }))
    }

    fn read_async(&self, sink: &mut dyn SampleSink) -> StatusCode {
        let mut sink: &mut dyn SampleSink = sink;
        let ctx = &mut sink as *mut &mut dyn SampleSink as *mut c_void;
        // SAFETY: ctx points at `sink`, which outlives the blocking call
        StatusCode::from_code(unsafe { (self.entry.read_async)(sample_trampoline, ctx) })
    }

    fn stop(&self) -> StatusCode {
        // SAFETY: no arguments
        StatusCode::from_code(unsafe { (self.entry.stop)() })
    }

    fn cleanup(&self) {
        // SAFETY: no arguments
        unsafe { (self.entry.cleanup)() }
    }

    fn last_error(&self) -> Option<String> {
        let last_error = self.entry.last_error?;
        let mut buffer = [0 as c_char; TEXT_BUFFER_LEN];
        // SAFETY: buffer holds TEXT_BUFFER_LEN bytes as the ABI requires
        unsafe { last_error(buffer.as_mut_ptr()) };
        read_c_buffer(&buffer)
    }

    fn exports(&self, symbol: &str) -> bool {
        match symbol {
            SYMBOL_INIT | SYMBOL_READ_ASYNC | SYMBOL_STOP | SYMBOL_SET_BASE_FREQ
            | SYMBOL_SET_SAMPLE_RATE | SYMBOL_CLEANUP => true,
            SYMBOL_GET_NAME => self.entry.get_name.is_some(),
            SYMBOL_GET_SAMPLE_RATE => self.entry.get_sample_rate.is_some(),
            SYMBOL_SET_GAIN => self.entry.set_gain.is_some(),
            SYMBOL_LAST_ERROR => self.entry.last_error.is_some(),
            SYMBOL_API_VERSION => self.entry.api_version.is_some(),
            _ => false,
        }
    }
}

/// Callback handed to `tsdrplugin_readasync`
///
/// `ctx` is the `*mut &mut dyn SampleSink` built in `read_async`. Panics are
/// stopped here; unwinding into C is undefined behaviour.
unsafe extern "C" fn sample_trampoline(buf: *mut f32, len: u32, ctx: *mut c_void, dropped: c_int) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: ctx was created from a live `&mut &mut dyn SampleSink`
    let sink = unsafe { &mut *(ctx as *mut &mut dyn SampleSink) };
    let samples: &[f32] = if buf.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: the module guarantees `len` readable floats at `buf`
        unsafe { std::slice::from_raw_parts(buf, len as usize) }
    };
    let dropped = u64::try_from(dropped).unwrap_or(0);

    if catch_unwind(AssertUnwindSafe(|| sink.on_samples(samples, dropped))).is_err() {
        tracing::error!("Sample sink panicked inside native callback");
    }
}
