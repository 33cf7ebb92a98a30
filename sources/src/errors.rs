//! Error types for source registration, plugin loading and streaming
//!
//! Every variant names the source or native module involved so a failure can
//! be traced back to a backend and, for native failures, to the entry point
//! and status code that caused it.

use std::path::PathBuf;

use tsdr_plugin_api::StatusCode;

use crate::plugin::lifecycle::SourceState;

/// Result alias used throughout the crate
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by the registry, resolver, loader and streaming sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Unknown source '{name}'")]
    NotFound { name: String },

    #[error("Duplicate source registration '{name}' (module '{module_id}')")]
    DuplicateName { name: String, module_id: String },

    #[error("Native module '{module_id}' not found (searched: {})", format_paths(.searched))]
    ModuleNotFound {
        module_id: String,
        searched: Vec<PathBuf>,
    },

    #[error("Failed to load native module '{module_id}' from {}: {message}", .path.display())]
    Load {
        module_id: String,
        path: PathBuf,
        message: String,
    },

    #[error("Native module '{module_id}' does not export required symbol '{symbol}'")]
    SymbolMissing { module_id: String, symbol: String },

    #[error("Native module '{module_id}' has ABI version {found}, host requires {required}")]
    IncompatibleVersion {
        module_id: String,
        required: String,
        found: String,
    },

    #[error("Native init of '{module_id}' failed: {status}{}", format_detail(.message))]
    Init {
        module_id: String,
        status: StatusCode,
        message: String,
    },

    #[error("Native call {call} of '{module_id}' failed: {status}{}", format_detail(.message))]
    Native {
        module_id: String,
        call: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("Native call {call} of '{module_id}' panicked: {message}")]
    NativeFault {
        module_id: String,
        call: &'static str,
        message: String,
    },

    #[error("Cannot {operation} source '{module_id}' in state {state}")]
    InvalidState {
        module_id: String,
        operation: &'static str,
        state: SourceState,
    },

    #[error("{parameter} {value} out of range [{min}, {max}] for '{module_id}'")]
    Range {
        module_id: String,
        parameter: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Source '{module_id}' does not support {capability}")]
    Unsupported {
        module_id: String,
        capability: &'static str,
    },

    #[error("Read loop of '{module_id}' ended without a stop request")]
    StreamEnded { module_id: String },

    #[error("Streaming worker of '{module_id}' failed: {message}")]
    Worker { module_id: String, message: String },
}

impl SourceError {
    /// Module identifier (or source name for lookup errors) the error refers to
    pub fn subject(&self) -> &str {
        match self {
            SourceError::NotFound { name } => name,
            SourceError::DuplicateName { module_id, .. }
            | SourceError::ModuleNotFound { module_id, .. }
            | SourceError::Load { module_id, .. }
            | SourceError::SymbolMissing { module_id, .. }
            | SourceError::IncompatibleVersion { module_id, .. }
            | SourceError::Init { module_id, .. }
            | SourceError::Native { module_id, .. }
            | SourceError::NativeFault { module_id, .. }
            | SourceError::InvalidState { module_id, .. }
            | SourceError::Range { module_id, .. }
            | SourceError::Unsupported { module_id, .. }
            | SourceError::StreamEnded { module_id }
            | SourceError::Worker { module_id, .. } => module_id,
        }
    }

    /// Native status code carried by the error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SourceError::Init { status, .. } | SourceError::Native { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error originated inside a native module
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            SourceError::Init { .. } | SourceError::Native { .. } | SourceError::NativeFault { .. }
        )
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no search paths".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(" ({message})")
    }
}
