//! Multi-Peak Filter Bank
//!
//! Several peaking filters on one shared input; the outputs of the enabled
//! filters are summed. Every filter in the bank uses the matched design and the
//! bank's cascade depth.

use crate::dsp::peak::{PeakCore, PeakDesign};
use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, expect_usize, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;

/// Configuration of one filter in the bank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Center frequency in Hz
    pub freq: f64,
    /// Bandwidth in Hz
    pub bandwidth: f64,
    /// Linear gain at the center frequency
    #[serde(default = "default_gain")]
    pub gain: f64,
}

fn default_true() -> bool {
    true
}

fn default_gain() -> f64 {
    1.0
}

impl PeakSpec {
    pub fn new(freq: f64, bandwidth: f64, gain: f64) -> Self {
        Self {
            enabled: true,
            freq,
            bandwidth,
            gain,
        }
    }
}

#[derive(Debug)]
struct BankFilter {
    enabled: bool,
    core: PeakCore,
}

#[derive(Debug)]
struct BankState {
    run: bool,
    buffers: StageBuffers,
    rate: f64,
    nstages: usize,
    /// Number of filters considered by execute
    active: usize,
    filters: Vec<BankFilter>,
    mix: Vec<f32>,
}

impl BankState {
    fn process(&mut self, mut io: BlockIo<'_>, size: usize) {
        let len = 2 * size;
        let mix = &mut self.mix[..len];
        mix.fill(0.0);

        let input = &io.input()[..len];
        for filter in self.filters[..self.active].iter_mut().filter(|f| f.enabled) {
            for (src, acc) in input.chunks_exact(2).zip(mix.chunks_exact_mut(2)) {
                let (i, q) = filter.core.tick(src[0], src[1]);
                acc[0] += i;
                acc[1] += q;
            }
        }
        io.output_mut()[..len].copy_from_slice(mix);
    }

    fn filter_mut(&mut self, index: usize) -> Option<&mut BankFilter> {
        let count = self.filters.len();
        let filter = self.filters.get_mut(index);
        if filter.is_none() {
            log::warn!("multi_peak: filter index {} out of range (bank has {})", index, count);
        }
        filter
    }
}

/// Parallel bank of peaking filters
///
/// # Example
/// ```
/// use iqchain::dsp::{MultiPeakFilterBank, PeakSpec, Stage};
/// use iqchain::engine::{BufferPool, StageBuffers};
///
/// let mut pool = BufferPool::new();
/// let buf = pool.allocate_complex(128);
/// let bank = MultiPeakFilterBank::new(
///     true,
///     StageBuffers::in_place(128, buf),
///     48_000.0,
///     &[PeakSpec::new(600.0, 80.0, 1.0), PeakSpec::new(1200.0, 80.0, 0.5)],
///     2,
/// );
/// bank.set_filter_enabled(1, false);
/// bank.execute(&mut pool);
/// ```
#[derive(Debug)]
pub struct MultiPeakFilterBank {
    state: Mutex<BankState>,
}

impl MultiPeakFilterBank {
    pub fn new(
        enabled: bool,
        buffers: StageBuffers,
        rate: f64,
        peaks: &[PeakSpec],
        nstages: usize,
    ) -> Self {
        let rate = clamp_rate("multi_peak", rate);
        let filters = peaks
            .iter()
            .map(|p| BankFilter {
                enabled: p.enabled,
                core: PeakCore::new(rate, p.freq, p.bandwidth, p.gain, nstages, PeakDesign::Matched),
            })
            .collect::<Vec<_>>();

        Self {
            state: Mutex::new(BankState {
                run: enabled,
                buffers,
                rate,
                nstages: nstages.max(1),
                active: filters.len(),
                filters,
                mix: vec![0.0; 2 * buffers.size],
            }),
        }
    }

    /// Number of filters allocated at construction
    pub fn len(&self) -> usize {
        lock(&self.state).filters.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).filters.is_empty()
    }

    /// Limit execution to the first `count` filters
    pub fn set_active_count(&self, count: usize) {
        let mut st = lock(&self.state);
        if count > st.filters.len() {
            log::warn!(
                "multi_peak: active count {} exceeds bank size {}, clamping",
                count,
                st.filters.len()
            );
        }
        st.active = count.min(st.filters.len());
    }

    pub fn active_count(&self) -> usize {
        lock(&self.state).active
    }

    /// Enable or disable one filter; out-of-range indices are ignored
    pub fn set_filter_enabled(&self, index: usize, enabled: bool) {
        if let Some(f) = lock(&self.state).filter_mut(index) {
            f.enabled = enabled;
        }
    }

    pub fn set_filter_freq(&self, index: usize, freq: f64) {
        if let Some(f) = lock(&self.state).filter_mut(index) {
            f.core.set_freq(freq);
        }
    }

    pub fn set_filter_bandwidth(&self, index: usize, bandwidth: f64) {
        if let Some(f) = lock(&self.state).filter_mut(index) {
            f.core.set_bandwidth(bandwidth);
        }
    }

    pub fn set_filter_gain(&self, index: usize, gain: f64) {
        if let Some(f) = lock(&self.state).filter_mut(index) {
            f.core.set_gain(gain);
        }
    }

    /// Current configuration of one filter
    pub fn filter(&self, index: usize) -> Option<PeakSpec> {
        lock(&self.state).filters.get(index).map(|f| PeakSpec {
            enabled: f.enabled,
            freq: f.core.freq(),
            bandwidth: f.core.bandwidth(),
            gain: f.core.gain(),
        })
    }

    /// Dispatch `filters.<index>.<field>` parameter names
    fn set_filter_param(&self, name: &str, value: &Value) -> Result<()> {
        let unknown = || StageError::UnknownParameter {
            stage: "multi_peak".to_string(),
            param: name.to_string(),
        };
        let (index, field) = name
            .strip_prefix("filters.")
            .and_then(|rest| rest.split_once('.'))
            .ok_or_else(unknown)?;
        let index: usize = index.parse().map_err(|_| unknown())?;

        match field {
            "enabled" => self.set_filter_enabled(index, expect_bool(name, value)?),
            "freq" => self.set_filter_freq(index, expect_f64(name, value)?),
            "bandwidth" => self.set_filter_bandwidth(index, expect_f64(name, value)?),
            "gain" => self.set_filter_gain(index, expect_f64(name, value)?),
            _ => return Err(unknown()),
        }
        Ok(())
    }
}

impl Stage for MultiPeakFilterBank {
    fn stage_type(&self) -> &'static str {
        "multi_peak"
    }

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        let mut st = lock(&self.state);
        let size = st.buffers.size.min(available);
        let io = pool.stage_block(&st.buffers);
        if st.run {
            st.process(io, size);
        } else {
            io.bypass(2 * size);
        }
        size
    }

    fn flush(&self) {
        let mut st = lock(&self.state);
        st.filters.iter_mut().for_each(|f| f.core.flush());
    }

    /// The mix buffer is sized here so execute never allocates
    fn set_buffers(&self, buffers: StageBuffers) {
        let mut st = lock(&self.state);
        st.mix.resize(2 * buffers.size, 0.0);
        st.buffers = buffers;
    }

    fn buffers(&self) -> StageBuffers {
        lock(&self.state).buffers
    }

    fn is_enabled(&self) -> bool {
        lock(&self.state).run
    }

    fn set_enabled(&self, enabled: bool) {
        lock(&self.state).run = enabled;
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        let filters: Vec<Value> = st
            .filters
            .iter()
            .map(|f| {
                json!({
                    "enabled": f.enabled,
                    "freq": f.core.freq(),
                    "bandwidth": f.core.bandwidth(),
                    "gain": f.core.gain(),
                })
            })
            .collect();
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "rate": st.rate,
            "stages": st.nstages,
            "active_count": st.active,
            "filters": filters,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => self.set_enabled(expect_bool(name, value)?),
            "active_count" => self.set_active_count(expect_usize(name, value)?),
            _ => return self.set_filter_param(name, value),
        }
        Ok(())
    }
}
