//! Channel context
//!
//! A [`Channel`] bundles one buffer pool, one stage chain and the named run
//! flags shared by its stages. A [`ChannelRegistry`] maps channel numbers to
//! channels so several independent chains can coexist in one process.

use crate::dsp::{ChainControl, RunFlag, StageChain};
use crate::engine::{BufferId, BufferPool};
use crate::error::{Result, StageError};
use std::collections::{BTreeMap, HashMap};

/// One processing chain with its buffers
pub struct Channel {
    sample_rate: f64,
    output_rate: f64,
    block_size: usize,
    pool: BufferPool,
    chain: StageChain,
    input: BufferId,
    output: BufferId,
    /// Floats per sample: 2 for complex, 1 for scalar
    input_stride: usize,
    output_stride: usize,
    buffer_names: HashMap<String, BufferId>,
    run_flags: HashMap<String, RunFlag>,
}

impl Channel {
    /// Create a channel reading blocks from `input` and emitting `output`
    pub fn new(
        sample_rate: f64,
        block_size: usize,
        pool: BufferPool,
        chain: StageChain,
        input: BufferId,
        output: BufferId,
    ) -> Self {
        Self {
            sample_rate,
            output_rate: sample_rate,
            block_size,
            pool,
            chain,
            input,
            output,
            input_stride: 2,
            output_stride: 2,
            buffer_names: HashMap::new(),
            run_flags: HashMap::new(),
        }
    }

    /// Set the rate of the output stream when the chain resamples
    pub fn with_output_rate(mut self, rate: f64) -> Self {
        self.output_rate = rate;
        self
    }

    /// Mark the input or output buffer as scalar
    pub fn with_scalar_io(mut self, scalar_input: bool, scalar_output: bool) -> Self {
        self.input_stride = if scalar_input { 1 } else { 2 };
        self.output_stride = if scalar_output { 1 } else { 2 };
        self
    }

    /// Register buffer names for lookup
    pub fn with_buffer_names(mut self, names: HashMap<String, BufferId>) -> Self {
        self.buffer_names = names;
        self
    }

    /// Register shared run flags for lookup
    pub fn with_run_flags(mut self, flags: HashMap<String, RunFlag>) -> Self {
        self.run_flags = flags;
        self
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn output_rate(&self) -> f64 {
        self.output_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Floats per input sample
    pub fn input_stride(&self) -> usize {
        self.input_stride
    }

    /// Floats per output sample
    pub fn output_stride(&self) -> usize {
        self.output_stride
    }

    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    /// Control handle for other threads
    pub fn control(&self) -> ChainControl {
        self.chain.control()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    /// Look up a buffer by configured name
    pub fn buffer(&self, name: &str) -> Option<BufferId> {
        self.buffer_names.get(name).copied()
    }

    /// Look up a shared run flag by configured name
    pub fn run_flag(&self, name: &str) -> Option<RunFlag> {
        self.run_flags.get(name).cloned()
    }

    /// Process one block.
    ///
    /// `samples` holds up to `block_size` input samples; a short final block
    /// is zero-padded. Returns the produced part of the output buffer.
    pub fn process_block(&mut self, samples: &[f32]) -> &[f32] {
        let block_len = self.input_stride() * self.block_size;
        if let Some(buffer) = self.pool.get_mut(self.input) {
            let len = block_len.min(buffer.len());
            let n = samples.len().min(len);
            buffer[..n].copy_from_slice(&samples[..n]);
            buffer[n..len].fill(0.0);
        }
        let produced = self.chain.execute(&mut self.pool);
        self.output_slice(produced)
    }

    fn output_slice(&self, produced: usize) -> &[f32] {
        match self.pool.get(self.output) {
            Some(buffer) => &buffer[..(produced * self.output_stride).min(buffer.len())],
            None => &[],
        }
    }

    /// Flush every stage and zero every buffer
    pub fn reset(&mut self) {
        self.chain.flush();
        self.pool.clear();
    }
}

/// Channel number to channel mapping
#[derive(Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<u32, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a channel, returning the one it replaces
    pub fn open(&mut self, number: u32, channel: Channel) -> Option<Channel> {
        log::info!("opening channel {}", number);
        self.channels.insert(number, channel)
    }

    /// Remove a channel; dropping it releases all stage memory
    pub fn close(&mut self, number: u32) -> Result<Channel> {
        self.channels
            .remove(&number)
            .ok_or(StageError::ChannelNotFound { channel: number })
    }

    pub fn get(&self, number: u32) -> Result<&Channel> {
        self.channels
            .get(&number)
            .ok_or(StageError::ChannelNotFound { channel: number })
    }

    pub fn get_mut(&mut self, number: u32) -> Result<&mut Channel> {
        self.channels
            .get_mut(&number)
            .ok_or(StageError::ChannelNotFound { channel: number })
    }

    /// Control handle of one channel's chain
    pub fn control(&self, number: u32) -> Result<ChainControl> {
        self.get(number).map(Channel::control)
    }

    /// Open channel numbers in ascending order
    pub fn numbers(&self) -> Vec<u32> {
        self.channels.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
