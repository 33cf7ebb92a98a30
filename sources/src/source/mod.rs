//! Uniform streaming interface over native source modules

pub mod samples;
pub mod streaming;
pub mod worker;

pub use samples::{Sample, SampleChunk, deinterleave};
pub use streaming::{
    DEFAULT_QUEUE_DEPTH, DEFAULT_READ_TIMEOUT, DEFAULT_STOP_GRACE, StreamOptions, StreamingSource,
};
