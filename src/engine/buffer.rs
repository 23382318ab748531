//! Sample Buffer Management
//!
//! Caller-owned sample memory for processing chains. Buffers are allocated once
//! in a [`BufferPool`] and never resized mid-stream; stages refer to them by
//! [`BufferId`] and never own them. Complex buffers are interleaved
//! (even index = in-phase, odd index = quadrature).

use serde::{Deserialize, Serialize};

/// Handle to one buffer in a [`BufferPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub usize);

/// Buffer assignment of a stage: block size plus input and output handles.
///
/// `size` counts complex samples for complex stages and scalars for the real
/// resampler. Input and output may be the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBuffers {
    pub size: usize,
    pub input: BufferId,
    pub output: BufferId,
}

impl StageBuffers {
    /// Create a buffer assignment
    pub fn new(size: usize, input: BufferId, output: BufferId) -> Self {
        Self {
            size,
            input,
            output,
        }
    }

    /// Assignment that processes a buffer in place
    pub fn in_place(size: usize, buffer: BufferId) -> Self {
        Self::new(size, buffer, buffer)
    }

    /// Check whether input and output alias
    pub fn is_in_place(&self) -> bool {
        self.input == self.output
    }
}

/// Arena of fixed-size sample buffers
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    buffers: Vec<Vec<f32>>,
}

impl BufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed buffer of `len` floats
    pub fn allocate(&mut self, len: usize) -> BufferId {
        self.buffers.push(vec![0.0; len]);
        BufferId(self.buffers.len() - 1)
    }

    /// Allocate a zeroed buffer holding `samples` interleaved complex samples
    pub fn allocate_complex(&mut self, samples: usize) -> BufferId {
        self.allocate(2 * samples)
    }

    /// Number of buffers in the pool
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Length of a buffer in floats
    pub fn capacity(&self, id: BufferId) -> Option<usize> {
        self.buffers.get(id.0).map(|b| b.len())
    }

    /// Get a buffer
    pub fn get(&self, id: BufferId) -> Option<&[f32]> {
        self.buffers.get(id.0).map(|b| b.as_slice())
    }

    /// Get a mutable buffer
    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut [f32]> {
        self.buffers.get_mut(id.0).map(|b| b.as_mut_slice())
    }

    /// Copy `samples` into the front of a buffer. Returns the number of floats copied.
    pub fn write(&mut self, id: BufferId, samples: &[f32]) -> usize {
        match self.buffers.get_mut(id.0) {
            Some(buffer) => {
                let n = samples.len().min(buffer.len());
                buffer[..n].copy_from_slice(&samples[..n]);
                n
            }
            None => 0,
        }
    }

    /// Zero every buffer
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
    }

    /// Borrow the input and output of one block.
    ///
    /// # Panics
    /// Panics if either id does not belong to this pool. Executing a stage
    /// against a foreign pool is a caller error.
    pub fn block(&mut self, input: BufferId, output: BufferId) -> BlockIo<'_> {
        if input == output {
            return BlockIo::InPlace(&mut self.buffers[input.0]);
        }
        if input.0 < output.0 {
            let (head, tail) = self.buffers.split_at_mut(output.0);
            BlockIo::Split {
                input: &head[input.0],
                output: &mut tail[0],
            }
        } else {
            let (head, tail) = self.buffers.split_at_mut(input.0);
            BlockIo::Split {
                input: &tail[0],
                output: &mut head[output.0],
            }
        }
    }

    /// Borrow the block described by a stage's buffer assignment
    pub fn stage_block(&mut self, buffers: &StageBuffers) -> BlockIo<'_> {
        self.block(buffers.input, buffers.output)
    }
}

/// Input/output view of one processing block
#[derive(Debug)]
pub enum BlockIo<'a> {
    /// Input and output are the same buffer
    InPlace(&'a mut [f32]),
    /// Disjoint input and output buffers
    Split {
        input: &'a [f32],
        output: &'a mut [f32],
    },
}

impl<'a> BlockIo<'a> {
    /// Check whether this block is processed in place
    pub fn is_in_place(&self) -> bool {
        matches!(self, BlockIo::InPlace(_))
    }

    /// Read-only view of the input
    pub fn input(&self) -> &[f32] {
        match self {
            BlockIo::InPlace(buffer) => buffer,
            BlockIo::Split { input, .. } => input,
        }
    }

    /// Mutable view of the output
    pub fn output_mut(&mut self) -> &mut [f32] {
        match self {
            BlockIo::InPlace(buffer) => buffer,
            BlockIo::Split { output, .. } => output,
        }
    }

    /// Bypass: copy `len` floats from input to output; a no-op when in place
    pub fn bypass(self, len: usize) {
        if let BlockIo::Split { input, output } = self {
            output[..len].copy_from_slice(&input[..len]);
        }
    }

    /// Run `f` over the first `samples` complex samples, writing each result
    /// to the output position of the sample it was computed from.
    pub fn map_iq<F>(self, samples: usize, mut f: F)
    where
        F: FnMut(f32, f32) -> (f32, f32),
    {
        let len = 2 * samples;
        match self {
            BlockIo::InPlace(buffer) => {
                for pair in buffer[..len].chunks_exact_mut(2) {
                    let (i, q) = f(pair[0], pair[1]);
                    pair[0] = i;
                    pair[1] = q;
                }
            }
            BlockIo::Split { input, output } => {
                for (src, dst) in input[..len]
                    .chunks_exact(2)
                    .zip(output[..len].chunks_exact_mut(2))
                {
                    let (i, q) = f(src[0], src[1]);
                    dst[0] = i;
                    dst[1] = q;
                }
            }
        }
    }
}

/// Magnitude of every complex sample in an interleaved slice
pub fn magnitudes(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|pair| (pair[0] * pair[0] + pair[1] * pair[1]).sqrt())
        .collect()
}

/// Interleave separate I and Q sample streams
pub fn interleave(i: &[f32], q: &[f32]) -> Vec<f32> {
    i.iter().zip(q).flat_map(|(&i, &q)| [i, q]).collect()
}
