//! Native Call Isolation
//!
//! Every call into a module goes through [`guard_native_call`]. A panic
//! raised by an in-process module (or by the host's own sample callback) is
//! caught and turned into [`SourceError::NativeFault`] instead of tearing
//! down the caller.
//!
//! `catch_unwind` only catches unwinding panics. A C or C++ module that
//! aborts or faults still takes the process with it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::errors::{SourceError, SourceResult};

/// Run a native entry point with panic containment
///
/// # Arguments
///
/// * `module_id` - Module being called, for the error and log
/// * `call` - Entry point name, e.g. `"setbasefreq"`
pub fn guard_native_call<F, T>(module_id: &str, call: &'static str, native_fn: F) -> SourceResult<T>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(native_fn)) {
        Ok(value) => Ok(value),
        Err(panic_info) => {
            let message = extract_panic_message(&panic_info);
            tracing::error!(module_id, call, message = %message, "Native call panicked");
            Err(SourceError::NativeFault {
                module_id: module_id.to_string(),
                call,
                message,
            })
        }
    }
}

/// Extract a readable message from a panic payload
pub fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
