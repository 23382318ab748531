//! Biquad Notch Filter
//!
//! Single second-order section with zeros on the unit circle at the notch
//! frequency. Bandwidth is relative to the sample rate: the pole radius is
//! `1 - 3 * bandwidth`.

use crate::dsp::biquad::{clamp_center, Biquad, BiquadHistory};
use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Largest relative bandwidth that keeps the poles inside the unit circle
const MAX_RELATIVE_BW: f64 = 0.33;

/// Narrowest relative bandwidth; also used when the bandwidth is NaN
const MIN_RELATIVE_BW: f64 = 1e-6;

#[derive(Debug)]
struct NotchState {
    run: bool,
    buffers: StageBuffers,
    rate: f64,
    freq: f64,
    bandwidth: f64,
    coefs: Biquad,
    /// I and Q histories
    hist: [BiquadHistory; 2],
}

impl NotchState {
    fn calc(&mut self) {
        let freq = clamp_center("notch", self.freq, self.rate);
        let bw = if self.bandwidth > 0.0 && self.bandwidth <= MAX_RELATIVE_BW {
            self.bandwidth
        } else {
            let clamped = if self.bandwidth.is_nan() {
                MIN_RELATIVE_BW
            } else {
                self.bandwidth.clamp(MIN_RELATIVE_BW, MAX_RELATIVE_BW)
            };
            log::warn!("notch: bandwidth {} out of range, using {}", self.bandwidth, clamped);
            clamped
        };
        self.coefs = Biquad::notch(freq / self.rate, 1.0 - 3.0 * bw);
    }

    fn process(&mut self, io: BlockIo<'_>, size: usize) {
        let coefs = self.coefs;
        let [hi, hq] = &mut self.hist;
        io.map_iq(size, |i, q| {
            (
                hi.tick(&coefs, i as f64) as f32,
                hq.tick(&coefs, q as f64) as f32,
            )
        });
    }
}

/// Biquad notch stage
#[derive(Debug)]
pub struct NotchFilter {
    state: Mutex<NotchState>,
}

impl NotchFilter {
    /// Create a notch at `freq` Hz.
    ///
    /// `bandwidth` is relative to the sample rate (e.g. `0.0002` for a tone notch).
    pub fn new(enabled: bool, buffers: StageBuffers, rate: f64, freq: f64, bandwidth: f64) -> Self {
        let mut state = NotchState {
            run: enabled,
            buffers,
            rate: clamp_rate("notch", rate),
            freq,
            bandwidth,
            coefs: Biquad::default(),
            hist: [BiquadHistory::default(); 2],
        };
        state.calc();
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_freq(&self, freq: f64) {
        let mut st = lock(&self.state);
        st.freq = freq;
        st.calc();
    }

    pub fn set_bandwidth(&self, bandwidth: f64) {
        let mut st = lock(&self.state);
        st.bandwidth = bandwidth;
        st.calc();
    }

    pub fn freq(&self) -> f64 {
        lock(&self.state).freq
    }

    pub fn bandwidth(&self) -> f64 {
        lock(&self.state).bandwidth
    }

    /// Current coefficient set
    pub fn coefficients(&self) -> Biquad {
        lock(&self.state).coefs
    }
}

impl Stage for NotchFilter {
    impl_stage_common!("notch");

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
        st.hist.iter_mut().for_each(BiquadHistory::reset);
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "rate": st.rate,
            "freq": st.freq,
            "bandwidth": st.bandwidth,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "freq" => self.set_freq(expect_f64(name, value)?),
            "bandwidth" => self.set_bandwidth(expect_f64(name, value)?),
            "enabled" => self.set_enabled(expect_bool(name, value)?),
            _ => {
                return Err(StageError::UnknownParameter {
                    stage: self.stage_type().to_string(),
                    param: name.to_string(),
                })
            }
        }
        Ok(())
    }
}
