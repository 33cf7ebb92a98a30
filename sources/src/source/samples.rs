//! I/Q sample types
//!
//! Native modules deliver interleaved `f32` pairs. The streaming layer
//! converts each callback block into complex samples once, on the producer
//! thread, so readers only move values around.

use num_complex::Complex32;

/// One complex baseband sample (I = re, Q = im)
pub type Sample = Complex32;

/// Convert interleaved I/Q floats into complex samples
///
/// A trailing unpaired float is ignored.
pub fn deinterleave(interleaved: &[f32]) -> Vec<Sample> {
    interleaved
        .chunks_exact(2)
        .map(|pair| Sample::new(pair[0], pair[1]))
        .collect()
}

/// A block of samples handed over by one native callback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleChunk {
    pub samples: Vec<Sample>,
    /// Samples the module discarded before this block
    pub dropped: u64,
}

impl SampleChunk {
    pub fn from_interleaved(interleaved: &[f32], dropped: u64) -> Self {
        Self {
            samples: deinterleave(interleaved),
            dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
