//! Chain Configuration
//!
//! A [`ChainConfig`] is the JSON description of one channel: its named
//! buffers, shared run flags and ordered stage list. [`ChainConfig::build`]
//! resolves every name, checks every buffer capacity and returns a ready
//! [`Channel`].

use crate::dsp::{
    max_output_samples, run_flag, AmMode, AmModulator, BandpassFilter, Delay, FrequencyShifter,
    GainStage, MultiPeakFilterBank, NotchFilter, PeakDesign, PeakFilter, PeakSpec, RealResampler,
    Resampler, RunFlag, Stage, StageChain, Window,
};
use crate::engine::{BufferId, BufferPool, Channel, StageBuffers};
use crate::error::{Result, StageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Complete description of one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Input sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Complex samples per block
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Named buffers
    #[serde(default)]
    pub buffers: BTreeMap<String, BufferSpec>,

    /// Names of shared run flags; all start raised
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_flags: Vec<String>,

    /// Stages in execution order
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Buffer the host fills each block; defaults to the first stage's input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Buffer the host reads after each block
    pub output: String,

    /// Rate of the output stream; defaults to the rate after the last resampler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_rate: Option<u32>,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_block_size() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_one_f32() -> f32 {
    1.0
}

fn default_stages() -> usize {
    1
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Capacity of one named buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSpec {
    /// Capacity in complex samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complex_len: Option<usize>,

    /// Capacity in scalar floats; marks the buffer as scalar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_len: Option<usize>,
}

impl BufferSpec {
    pub fn complex(len: usize) -> Self {
        Self {
            complex_len: Some(len),
            scalar_len: None,
        }
    }

    pub fn scalar(len: usize) -> Self {
        Self {
            complex_len: None,
            scalar_len: Some(len),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar_len.is_some()
    }

    /// Length in floats
    fn floats(&self, block_size: usize) -> usize {
        match self.scalar_len {
            Some(len) => len,
            None => 2 * self.complex_len.unwrap_or(block_size),
        }
    }
}

/// One stage entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Chain id; generated when omitted
    #[serde(default = "generate_id")]
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Input buffer name
    pub input: String,

    /// Output buffer name; the stage runs in place when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Samples per block; defaults to the size reaching this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    /// Sample rate; defaults to the rate reaching this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,

    #[serde(flatten)]
    pub kind: StageKind,
}

/// Stage type and its construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKind {
    Delay {
        /// Delay in seconds
        #[serde(default)]
        delay: f64,
        /// Time resolution in seconds; defaults to an eighth of a sample
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tdelta: Option<f64>,
    },
    Shift {
        freq: f64,
    },
    Notch {
        freq: f64,
        /// Relative to the sample rate
        bandwidth: f64,
    },
    Peak {
        freq: f64,
        bandwidth: f64,
        #[serde(default = "default_one")]
        gain: f64,
        #[serde(default = "default_stages")]
        stages: usize,
        #[serde(default)]
        design: PeakDesign,
    },
    MultiPeak {
        filters: Vec<PeakSpec>,
        #[serde(default = "default_stages")]
        stages: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_count: Option<usize>,
    },
    Resample {
        out_rate: u32,
        /// Cutoff in Hz; 0 selects the default
        #[serde(default)]
        fc: f64,
        /// Filter length; 0 selects the default
        #[serde(default)]
        ncoef: usize,
        #[serde(default = "default_one")]
        gain: f64,
    },
    ResampleReal {
        out_rate: u32,
    },
    Gain {
        #[serde(default = "default_one_f32")]
        i_gain: f32,
        #[serde(default = "default_one_f32")]
        q_gain: f32,
        /// Shared run flag name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_flag: Option<String>,
    },
    Bandpass {
        f_low: f64,
        f_high: f64,
        #[serde(default)]
        window: Window,
        #[serde(default = "default_one")]
        gain: f64,
    },
    AmMod {
        #[serde(default)]
        mode: AmMode,
        #[serde(default)]
        carrier_level: f32,
    },
}

impl StageKind {
    /// Floats per sample on this stage's buffers
    fn stride(&self) -> usize {
        match self {
            StageKind::ResampleReal { .. } => 1,
            _ => 2,
        }
    }

    /// Output samples per block and the rate leaving the stage
    fn output_shape(&self, size: usize, rate: u32) -> (usize, u32) {
        match *self {
            StageKind::Resample { out_rate, .. } | StageKind::ResampleReal { out_rate } => {
                (max_output_samples(size, rate, out_rate), out_rate)
            }
            _ => (size, rate),
        }
    }

    /// Samples per block the next stage sees by default
    fn next_size(&self, size: usize, rate: u32) -> usize {
        match *self {
            StageKind::Resample { out_rate, .. } | StageKind::ResampleReal { out_rate } => {
                (size * out_rate as usize).div_ceil(rate.max(1) as usize)
            }
            _ => size,
        }
    }
}

impl ChainConfig {
    /// Empty configuration writing to `output`
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            buffers: BTreeMap::new(),
            run_flags: Vec::new(),
            stages: Vec::new(),
            input: None,
            output: output.into(),
            output_rate: None,
        }
    }

    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("loading chain config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Name of the buffer the host fills
    pub fn input_buffer(&self) -> &str {
        self.input
            .as_deref()
            .or_else(|| self.stages.first().map(|s| s.input.as_str()))
            .unwrap_or(&self.output)
    }

    /// Allocate buffers, construct every stage and assemble the channel
    pub fn build(&self) -> Result<Channel> {
        check_rate("sample_rate", self.sample_rate)?;
        if let Some(rate) = self.output_rate {
            check_rate("output_rate", rate)?;
        }

        let mut pool = BufferPool::new();
        let mut ids: HashMap<String, BufferId> = HashMap::new();
        for (name, spec) in &self.buffers {
            let id = pool.allocate(spec.floats(self.block_size));
            ids.insert(name.clone(), id);
        }

        let flags: HashMap<String, RunFlag> = self
            .run_flags
            .iter()
            .map(|name| (name.clone(), run_flag(true)))
            .collect();

        let input = lookup(&ids, self.input_buffer())?;
        let output = lookup(&ids, &self.output)?;

        let chain = StageChain::new();
        let mut size = self.block_size;
        let mut rate = self.sample_rate;
        for entry in &self.stages {
            let stage_size = entry.size.unwrap_or(size);
            let stage_rate = entry.rate.unwrap_or(rate);
            check_rate(&format!("{}.rate", entry.id), stage_rate)?;
            let in_name = entry.input.as_str();
            let out_name = entry.output.as_deref().unwrap_or(in_name);
            let buffers = StageBuffers::new(stage_size, lookup(&ids, in_name)?, lookup(&ids, out_name)?);

            let stride = entry.kind.stride();
            let (out_samples, out_rate) = entry.kind.output_shape(stage_size, stage_rate);
            check_rate(&format!("{}.out_rate", entry.id), out_rate)?;
            self.check_capacity(&pool, &ids, in_name, stride * stage_size)?;
            self.check_capacity(&pool, &ids, out_name, stride * out_samples)?;

            let stage = make_stage(entry, buffers, stage_rate, &flags)?;
            chain.push(entry.id.clone(), stage)?;

            size = entry.kind.next_size(stage_size, stage_rate);
            rate = out_rate;
        }

        let output_rate = self.output_rate.unwrap_or(rate);
        log::info!(
            "built chain: {} stages, {} buffers, {} Hz -> {} Hz",
            chain.len(),
            pool.len(),
            self.sample_rate,
            output_rate
        );

        let scalar = |name: &str| self.buffers.get(name).is_some_and(BufferSpec::is_scalar);
        Ok(
            Channel::new(self.sample_rate as f64, self.block_size, pool, chain, input, output)
                .with_output_rate(output_rate as f64)
                .with_scalar_io(scalar(self.input_buffer()), scalar(&self.output))
                .with_buffer_names(ids)
                .with_run_flags(flags),
        )
    }

    fn check_capacity(
        &self,
        pool: &BufferPool,
        ids: &HashMap<String, BufferId>,
        name: &str,
        required: usize,
    ) -> Result<()> {
        let actual = lookup(ids, name)
            .ok()
            .and_then(|id| pool.capacity(id))
            .unwrap_or(0);
        if actual < required {
            return Err(StageError::BufferTooSmall {
                buffer: name.to_string(),
                required,
                actual,
            });
        }
        Ok(())
    }
}

fn check_rate(param: &str, rate: u32) -> Result<()> {
    if rate == 0 {
        return Err(StageError::InvalidParameter {
            param: param.to_string(),
            value: rate.to_string(),
            expected: "sample rate above 0 Hz".to_string(),
        });
    }
    Ok(())
}

fn lookup(ids: &HashMap<String, BufferId>, name: &str) -> Result<BufferId> {
    ids.get(name).copied().ok_or_else(|| StageError::UnknownBuffer {
        name: name.to_string(),
    })
}

fn make_stage(
    entry: &StageConfig,
    buffers: StageBuffers,
    rate: u32,
    flags: &HashMap<String, RunFlag>,
) -> Result<Arc<dyn Stage>> {
    let enabled = entry.enabled;
    let fs = rate as f64;
    let stage: Arc<dyn Stage> = match &entry.kind {
        StageKind::Delay { delay, tdelta } => {
            let tdelta = tdelta.unwrap_or(1.0 / (8.0 * fs));
            Arc::new(Delay::new(enabled, buffers, fs, tdelta, *delay))
        }
        StageKind::Shift { freq } => Arc::new(FrequencyShifter::new(enabled, buffers, fs, *freq)),
        StageKind::Notch { freq, bandwidth } => {
            Arc::new(NotchFilter::new(enabled, buffers, fs, *freq, *bandwidth))
        }
        StageKind::Peak {
            freq,
            bandwidth,
            gain,
            stages,
            design,
        } => Arc::new(PeakFilter::new(
            enabled, buffers, fs, *freq, *bandwidth, *gain, *stages, *design,
        )),
        StageKind::MultiPeak {
            filters,
            stages,
            active_count,
        } => {
            let bank = MultiPeakFilterBank::new(enabled, buffers, fs, filters, *stages);
            if let Some(n) = active_count {
                bank.set_active_count(*n);
            }
            Arc::new(bank)
        }
        StageKind::Resample {
            out_rate,
            fc,
            ncoef,
            gain,
        } => Arc::new(Resampler::new(enabled, buffers, rate, *out_rate, *fc, *ncoef, *gain)),
        StageKind::ResampleReal { out_rate } => {
            Arc::new(RealResampler::new(enabled, buffers, rate, *out_rate))
        }
        StageKind::Gain {
            i_gain,
            q_gain,
            run_flag: flag_name,
        } => {
            let prun = match flag_name {
                Some(name) => Some(flags.get(name).cloned().ok_or_else(|| {
                    StageError::UnknownRunFlag { name: name.clone() }
                })?),
                None => None,
            };
            Arc::new(GainStage::new(enabled, prun, buffers, *i_gain, *q_gain))
        }
        StageKind::Bandpass {
            f_low,
            f_high,
            window,
            gain,
        } => Arc::new(BandpassFilter::new(enabled, buffers, fs, *f_low, *f_high, *window, *gain)),
        StageKind::AmMod {
            mode,
            carrier_level,
        } => Arc::new(AmModulator::new(enabled, buffers, *mode, *carrier_level)),
    };
    Ok(stage)
}
