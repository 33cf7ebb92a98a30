//! # TSDR Plugin API
//!
//! This crate describes the C ABI that a native SDR source module must export
//! so the source loader can drive it. The ABI is deliberately plain C: modules
//! are usually written in C or C++ against vendor SDKs (SoapySDR, UHD, Mirics),
//! and the same contract can be implemented from Rust with `#[no_mangle]`
//! functions.
//!
//! # Entry Points
//!
//! Every module exports a fixed set of `extern "system"` functions. The
//! required set covers the whole streaming lifecycle:
//!
//! - `tsdrplugin_init(params)` - open the device described by `params`
//! - `tsdrplugin_readasync(cb, ctx)` - stream samples into `cb` until stopped
//! - `tsdrplugin_stop()` - make a running `readasync` return
//! - `tsdrplugin_setbasefreq(hz)` / `tsdrplugin_setsamplerate(hz)`
//! - `tsdrplugin_cleanup()` - release the device
//!
//! Optional entry points (name, sample-rate query, gain, last error text and
//! ABI version) are looked up lazily and simply reported as unsupported when
//! missing.
//!
//! # Sample Delivery
//!
//! `readasync` blocks in the calling thread and invokes the callback with
//! interleaved `f32` I/Q pairs. `len` counts floats, not samples. A callback
//! with `len == 0` and a positive `dropped` count reports a block the module
//! had to discard.
//!
//! # Example Module
//!
//! ```rust,ignore
//! use std::ffi::{c_char, c_int, c_void};
//! use tsdr_plugin_api::{SampleCallback, StatusCode, PLUGIN_API_VERSION};
//!
//! #[no_mangle]
//! pub extern "system" fn tsdrplugin_getapiversion() -> u32 {
//!     PLUGIN_API_VERSION
//! }
//!
//! #[no_mangle]
//! pub extern "system" fn tsdrplugin_init(_params: *const c_char) -> c_int {
//!     StatusCode::Ok.code()
//! }
//!
//! #[no_mangle]
//! pub extern "system" fn tsdrplugin_readasync(cb: SampleCallback, ctx: *mut c_void) -> c_int {
//!     // call `cb` until tsdrplugin_stop() is invoked
//!     StatusCode::Ok.code()
//! }
//! ```

use std::ffi::{c_char, c_int, c_void, CStr};

use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol Names
// =============================================================================

/// `tsdrplugin_init(params: *const c_char) -> c_int`
pub const SYMBOL_INIT: &str = "tsdrplugin_init";

/// `tsdrplugin_readasync(cb: SampleCallback, ctx: *mut c_void) -> c_int`
pub const SYMBOL_READ_ASYNC: &str = "tsdrplugin_readasync";

/// `tsdrplugin_stop() -> c_int`
pub const SYMBOL_STOP: &str = "tsdrplugin_stop";

/// `tsdrplugin_setbasefreq(freq: u32) -> c_int`
pub const SYMBOL_SET_BASE_FREQ: &str = "tsdrplugin_setbasefreq";

/// `tsdrplugin_setsamplerate(rate: u32) -> u32`
pub const SYMBOL_SET_SAMPLE_RATE: &str = "tsdrplugin_setsamplerate";

/// `tsdrplugin_cleanup()`
pub const SYMBOL_CLEANUP: &str = "tsdrplugin_cleanup";

/// `tsdrplugin_getName(name: *mut c_char)`
pub const SYMBOL_GET_NAME: &str = "tsdrplugin_getName";

/// `tsdrplugin_getsamplerate() -> u32`
pub const SYMBOL_GET_SAMPLE_RATE: &str = "tsdrplugin_getsamplerate";

/// `tsdrplugin_setgain(gain: f32) -> c_int`
pub const SYMBOL_SET_GAIN: &str = "tsdrplugin_setgain";

/// `tsdrplugin_getlasterrortext(text: *mut c_char) -> c_int`
pub const SYMBOL_LAST_ERROR: &str = "tsdrplugin_getlasterrortext";

/// `tsdrplugin_getapiversion() -> u32`
pub const SYMBOL_API_VERSION: &str = "tsdrplugin_getapiversion";

/// Symbols a module must export to be loadable.
pub const REQUIRED_SYMBOLS: &[&str] = &[
    SYMBOL_INIT,
    SYMBOL_READ_ASYNC,
    SYMBOL_STOP,
    SYMBOL_SET_BASE_FREQ,
    SYMBOL_SET_SAMPLE_RATE,
    SYMBOL_CLEANUP,
];

/// Symbols a module may export.
pub const OPTIONAL_SYMBOLS: &[&str] = &[
    SYMBOL_GET_NAME,
    SYMBOL_GET_SAMPLE_RATE,
    SYMBOL_SET_GAIN,
    SYMBOL_LAST_ERROR,
    SYMBOL_API_VERSION,
];

/// Size of the buffers the host passes to `getName` and `getlasterrortext`.
///
/// Modules must write a null-terminated string no longer than this,
/// terminator included.
pub const TEXT_BUFFER_LEN: usize = 200;

// =============================================================================
// Function Pointer Types
// =============================================================================

/// Sample delivery callback handed to `tsdrplugin_readasync`.
///
/// `buf` points to `len` interleaved floats (I, Q, I, Q, ...). `ctx` is the
/// opaque pointer the host passed to `readasync`.
pub type SampleCallback =
    unsafe extern "C" fn(buf: *mut f32, len: u32, ctx: *mut c_void, dropped: c_int);

/// Function pointer types for plugin symbols.
pub mod ffi {
    use super::*;

    /// `tsdrplugin_init(params) -> status`
    pub type InitFn = unsafe extern "system" fn(params: *const c_char) -> c_int;

    /// `tsdrplugin_readasync(cb, ctx) -> status`
    pub type ReadAsyncFn = unsafe extern "system" fn(cb: SampleCallback, ctx: *mut c_void) -> c_int;

    /// `tsdrplugin_stop() -> status`
    pub type StopFn = unsafe extern "system" fn() -> c_int;

    /// `tsdrplugin_setbasefreq(freq) -> status`
    pub type SetBaseFreqFn = unsafe extern "system" fn(freq: u32) -> c_int;

    /// `tsdrplugin_setsamplerate(rate) -> actual rate`
    pub type SetSampleRateFn = unsafe extern "system" fn(rate: u32) -> u32;

    /// `tsdrplugin_cleanup()`
    pub type CleanupFn = unsafe extern "system" fn();

    /// `tsdrplugin_getName(name)`
    pub type GetNameFn = unsafe extern "system" fn(name: *mut c_char);

    /// `tsdrplugin_getsamplerate() -> rate`
    pub type GetSampleRateFn = unsafe extern "system" fn() -> u32;

    /// `tsdrplugin_setgain(gain) -> status`
    pub type SetGainFn = unsafe extern "system" fn(gain: f32) -> c_int;

    /// `tsdrplugin_getlasterrortext(text) -> status`
    pub type LastErrorFn = unsafe extern "system" fn(text: *mut c_char) -> c_int;

    /// `tsdrplugin_getapiversion() -> packed version`
    pub type ApiVersionFn = unsafe extern "system" fn() -> u32;
}

// =============================================================================
// Status Codes
// =============================================================================

/// Status codes returned by native entry points.
///
/// Zero is success; every other value is a failure. Values outside the
/// known table are kept as [`StatusCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    PluginError,
    WrongVideoParams,
    AlreadyRunning,
    PluginParametersWrong,
    SampleRateWrong,
    CannotOpenDevice,
    IncompatiblePlugin,
    InvalidParameter,
    NotImplemented,
    Unknown(i32),
}

impl StatusCode {
    /// Map a raw status code to its symbolic form
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::PluginError,
            2 => StatusCode::WrongVideoParams,
            3 => StatusCode::AlreadyRunning,
            4 => StatusCode::PluginParametersWrong,
            5 => StatusCode::SampleRateWrong,
            6 => StatusCode::CannotOpenDevice,
            7 => StatusCode::IncompatiblePlugin,
            8 => StatusCode::InvalidParameter,
            9 => StatusCode::NotImplemented,
            other => StatusCode::Unknown(other),
        }
    }

    /// Raw value as returned across the ABI
    pub fn code(self) -> c_int {
        match self {
            StatusCode::Ok => 0,
            StatusCode::PluginError => 1,
            StatusCode::WrongVideoParams => 2,
            StatusCode::AlreadyRunning => 3,
            StatusCode::PluginParametersWrong => 4,
            StatusCode::SampleRateWrong => 5,
            StatusCode::CannotOpenDevice => 6,
            StatusCode::IncompatiblePlugin => 7,
            StatusCode::InvalidParameter => 8,
            StatusCode::NotImplemented => 9,
            StatusCode::Unknown(other) => other,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Short human-readable description
    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::PluginError => "plugin error",
            StatusCode::WrongVideoParams => "wrong video parameters",
            StatusCode::AlreadyRunning => "already running",
            StatusCode::PluginParametersWrong => "plugin parameters wrong",
            StatusCode::SampleRateWrong => "sample rate wrong",
            StatusCode::CannotOpenDevice => "cannot open device",
            StatusCode::IncompatiblePlugin => "incompatible plugin",
            StatusCode::InvalidParameter => "invalid parameter",
            StatusCode::NotImplemented => "not implemented",
            StatusCode::Unknown(_) => "unknown status",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

// =============================================================================
// ABI Versioning
// =============================================================================

/// Current ABI version.
///
/// Format: (major << 24) | (minor << 16) | patch
pub const PLUGIN_API_VERSION: u32 = 0x01_00_0000;

/// Extract major version from a packed ABI version.
#[inline]
pub const fn version_major(v: u32) -> u32 {
    (v >> 24) & 0xFF
}

/// Extract minor version from a packed ABI version.
#[inline]
pub const fn version_minor(v: u32) -> u32 {
    (v >> 16) & 0xFF
}

/// Extract patch version from a packed ABI version.
#[inline]
pub const fn version_patch(v: u32) -> u32 {
    v & 0xFFFF
}

/// Pack a version triple.
#[inline]
pub const fn pack_version(major: u32, minor: u32, patch: u32) -> u32 {
    ((major & 0xFF) << 24) | ((minor & 0xFF) << 16) | (patch & 0xFFFF)
}

/// Format a packed ABI version as `major.minor.patch`.
pub fn format_version(v: u32) -> String {
    format!("{}.{}.{}", version_major(v), version_minor(v), version_patch(v))
}

// =============================================================================
// String Helpers
// =============================================================================

/// Copy `text` into a caller-provided C buffer, truncating to fit.
///
/// # Safety
///
/// `dst` must be null or valid for writes of `capacity` bytes.
pub unsafe fn write_c_str(dst: *mut c_char, capacity: usize, text: &str) {
    if dst.is_null() || capacity == 0 {
        return;
    }
    let bytes = text.as_bytes();
    let len = bytes.len().min(capacity - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, dst, len);
    *dst.add(len) = 0;
}

/// Read a null-terminated buffer filled by a module.
///
/// Returns `None` for an empty string. Bytes after the first null are
/// ignored; a buffer without a terminator is cut at its last byte.
pub fn read_c_buffer(buffer: &[c_char]) -> Option<String> {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Convert a C string pointer to an owned String.
///
/// # Safety
///
/// The pointer must be null or a valid null-terminated C string.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}
