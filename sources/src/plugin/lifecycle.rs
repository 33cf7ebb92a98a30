//! Source Lifecycle Management
//!
//! This module defines the states a streaming source moves through and the
//! bookkeeping kept for it while it is open.
//!
//! # Lifecycle State Machine
//!
//! ```text
//!     +-------------+
//!     |   Created   |  (module loaded, handle owned)
//!     +------+------+
//!            | init()
//!            v
//!     +------+------+   start()   +-----------+
//!     | Initialized | ----------> | Streaming |
//!     +------+------+ <---------- +-----+-----+
//!            |    stop() / stream end   |
//!            |                          |
//!            |   native error / fault   |
//!            |      +----------+        |
//!            +----> |  Failed  | <------+
//!            |      +----+-----+
//!            | close()   | close()
//!            v           v
//!     +------+-----------+--+
//!     |        Closed       |  (module unloaded)
//!     +---------------------+
//! ```
//!
//! `close()` is accepted from every state, including `Closed` where it does
//! nothing. A source whose read loop outlived `close()` stays `Failed` with
//! its module loaded until a later `close()` or drop releases it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Streaming source lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Native module loaded, init not yet called
    Created,

    /// Native init succeeded; the source can be configured and started
    Initialized,

    /// The producer thread is running the native read loop
    Streaming,

    /// A native call failed; only close() is permitted
    Failed,

    /// Module released; terminal
    Closed,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Created => write!(f, "created"),
            SourceState::Initialized => write!(f, "initialized"),
            SourceState::Streaming => write!(f, "streaming"),
            SourceState::Failed => write!(f, "failed"),
            SourceState::Closed => write!(f, "closed"),
        }
    }
}

impl SourceState {
    /// Check if init() is permitted
    pub fn can_init(&self) -> bool {
        matches!(self, SourceState::Created)
    }

    /// Check if start() is permitted
    pub fn can_start(&self) -> bool {
        matches!(self, SourceState::Initialized)
    }

    /// Check if stop() is permitted (including the no-op case)
    pub fn can_stop(&self) -> bool {
        matches!(self, SourceState::Streaming | SourceState::Initialized)
    }

    /// Check if frequency, sample rate and gain may be changed
    pub fn can_configure(&self) -> bool {
        matches!(self, SourceState::Initialized | SourceState::Streaming)
    }

    /// Check if samples can be read
    pub fn can_read(&self) -> bool {
        matches!(self, SourceState::Streaming)
    }

    /// Check if no further operation other than close() will succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceState::Failed | SourceState::Closed)
    }
}

/// Counters updated by the producer thread and the read path
#[derive(Debug)]
pub struct StreamCounters {
    opened_at: Instant,
    chunks: AtomicU64,
    samples_produced: AtomicU64,
    samples_delivered: AtomicU64,
    dropped_samples: AtomicU64,
    native_errors: AtomicU64,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            chunks: AtomicU64::new(0),
            samples_produced: AtomicU64::new(0),
            samples_delivered: AtomicU64::new(0),
            dropped_samples: AtomicU64::new(0),
            native_errors: AtomicU64::new(0),
        }
    }

    /// Record a chunk handed over by the native callback
    pub fn record_chunk(&self, samples: usize, dropped: u64) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.samples_produced
            .fetch_add(samples as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped_samples.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    /// Record samples returned to a caller
    pub fn record_delivered(&self, samples: usize) {
        self.samples_delivered
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Record a failed native call
    pub fn record_native_error(&self) {
        self.native_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the source was opened
    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Consistent-enough copy of the counters for reporting
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            chunks: self.chunks.load(Ordering::Relaxed),
            samples_produced: self.samples_produced.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            native_errors: self.native_errors.load(Ordering::Relaxed),
            uptime_ms: self.uptime().as_millis() as u64,
        }
    }
}

impl Default for StreamCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a source's streaming statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamStats {
    /// Callback invocations received from the native module
    pub chunks: u64,
    /// Samples the native module produced
    pub samples_produced: u64,
    /// Samples handed to callers through read()
    pub samples_delivered: u64,
    /// Samples the native module reported as dropped
    pub dropped_samples: u64,
    /// Native calls that returned a failure
    pub native_errors: u64,
    /// Milliseconds since the source was opened
    pub uptime_ms: u64,
}
