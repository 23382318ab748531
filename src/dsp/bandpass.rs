//! FFT Bandpass Filter
//!
//! Complex windowed-sinc bandpass applied by overlap-save convolution. The
//! kernel has `size + 1` taps and the FFT size is `2 * size`; each block is
//! appended to the previous one, transformed, multiplied, transformed back, and
//! the first `size` results are emitted.

use crate::dsp::fir::{fftcv_mults, fir_bandpass, ImpulseFormat, Window};
use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

struct BandpassState {
    run: bool,
    buffers: StageBuffers,
    rate: f64,
    f_low: f64,
    f_high: f64,
    window: Window,
    gain: f64,
    /// Frequency-domain kernel, `2 * size` bins
    mults: Vec<Complex<f32>>,
    /// Previous block followed by the current block
    infilt: Vec<Complex<f32>>,
    product: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for BandpassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandpassState")
            .field("run", &self.run)
            .field("buffers", &self.buffers)
            .field("f_low", &self.f_low)
            .field("f_high", &self.f_high)
            .field("window", &self.window)
            .field("nfft", &self.mults.len())
            .finish_non_exhaustive()
    }
}

impl BandpassState {
    fn block_len(&self) -> usize {
        self.buffers.size.max(1)
    }

    /// Re-plan the transforms when the block size changed
    fn plan(&mut self) {
        let nfft = 2 * self.block_len();
        if self.infilt.len() == nfft {
            return;
        }
        let mut planner = FftPlanner::new();
        self.forward = planner.plan_fft_forward(nfft);
        self.inverse = planner.plan_fft_inverse(nfft);
        let scratch_len = self
            .forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_inplace_scratch_len());
        self.infilt = vec![Complex::default(); nfft];
        self.product = vec![Complex::default(); nfft];
        self.scratch = vec![Complex::default(); scratch_len];
    }

    fn calc(&mut self) {
        self.plan();
        let n = self.block_len();
        // fir_bandpass emits conjugated complex taps; mirror the edges so the
        // pass band refers to the signal spectrum
        let impulse = fir_bandpass(
            n + 1,
            -self.f_high,
            -self.f_low,
            self.rate,
            self.window,
            ImpulseFormat::Complex,
            self.gain / (2 * n) as f64,
        );
        self.mults = fftcv_mults(2 * n, &impulse);
        log::debug!(
            "bandpass: {}..{} Hz, {} taps, fft {}",
            self.f_low,
            self.f_high,
            n + 1,
            2 * n
        );
    }

    /// Filter the first `count` samples of the block.
    ///
    /// The window slides by `count`, so a short block from an upstream
    /// resampler keeps the stream contiguous.
    fn process(&mut self, mut io: BlockIo<'_>, count: usize) {
        let n = self.buffers.size;
        self.infilt.copy_within(count.., 0);
        for (slot, pair) in self.infilt[2 * n - count..]
            .iter_mut()
            .zip(io.input()[..2 * count].chunks_exact(2))
        {
            *slot = Complex::new(pair[0], pair[1]);
        }

        self.product.copy_from_slice(&self.infilt);
        self.forward.process_with_scratch(&mut self.product, &mut self.scratch);
        for (p, m) in self.product.iter_mut().zip(&self.mults) {
            *p *= *m;
        }
        self.inverse.process_with_scratch(&mut self.product, &mut self.scratch);

        for (pair, y) in io.output_mut()[..2 * count]
            .chunks_exact_mut(2)
            .zip(&self.product[n - count..n])
        {
            pair[0] = y.re;
            pair[1] = y.im;
        }
    }
}

/// Overlap-save FIR bandpass stage
///
/// Band edges are in Hz and may be negative: `(-3000, -300)` keeps the lower
/// sideband only.
#[derive(Debug)]
pub struct BandpassFilter {
    state: Mutex<BandpassState>,
}

impl BandpassFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        buffers: StageBuffers,
        rate: f64,
        f_low: f64,
        f_high: f64,
        window: Window,
        gain: f64,
    ) -> Self {
        let mut planner = FftPlanner::new();
        let mut state = BandpassState {
            run: enabled,
            buffers,
            rate: clamp_rate("bandpass", rate),
            f_low,
            f_high,
            window,
            gain,
            mults: Vec::new(),
            infilt: Vec::new(),
            product: Vec::new(),
            scratch: Vec::new(),
            forward: planner.plan_fft_forward(1),
            inverse: planner.plan_fft_inverse(1),
        };
        state.calc();
        Self {
            state: Mutex::new(state),
        }
    }

    /// Move the band edges
    pub fn set_freqs(&self, f_low: f64, f_high: f64) {
        let mut st = lock(&self.state);
        st.f_low = f_low;
        st.f_high = f_high;
        st.calc();
    }

    pub fn set_window(&self, window: Window) {
        let mut st = lock(&self.state);
        st.window = window;
        st.calc();
    }

    pub fn set_gain(&self, gain: f64) {
        let mut st = lock(&self.state);
        st.gain = gain;
        st.calc();
    }

    pub fn freqs(&self) -> (f64, f64) {
        let st = lock(&self.state);
        (st.f_low, st.f_high)
    }
}

impl Stage for BandpassFilter {
    fn stage_type(&self) -> &'static str {
        "bandpass"
    }

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        let mut st = lock(&self.state);
        let size = st.buffers.size.min(available);
        let io = pool.stage_block(&st.buffers);
        if st.run && size > 0 {
            st.process(io, size);
        } else {
            io.bypass(2 * size);
        }
        size
    }

    fn flush(&self) {
        lock(&self.state).infilt.fill(Complex::default());
    }

    /// Reassigning buffers with a new size redesigns the kernel for the new FFT length
    fn set_buffers(&self, buffers: StageBuffers) {
        let mut st = lock(&self.state);
        let resized = st.buffers.size != buffers.size;
        st.buffers = buffers;
        if resized {
            st.calc();
        }
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
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "rate": st.rate,
            "f_low": st.f_low,
            "f_high": st.f_high,
            "window": st.window,
            "gain": st.gain,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "f_low" => {
                let f_high = self.freqs().1;
                self.set_freqs(expect_f64(name, value)?, f_high);
            }
            "f_high" => {
                let f_low = self.freqs().0;
                self.set_freqs(f_low, expect_f64(name, value)?);
            }
            "gain" => self.set_gain(expect_f64(name, value)?),
            "window" => {
                let window = match value {
                    Value::Number(n) => n.as_i64().map(Window::from_index),
                    Value::String(_) => serde_json::from_value(value.clone()).ok(),
                    _ => None,
                };
                let window = window.ok_or_else(|| StageError::InvalidParameter {
                    param: name.to_string(),
                    value: value.to_string(),
                    expected: "window name or index".to_string(),
                })?;
                self.set_window(window);
            }
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
