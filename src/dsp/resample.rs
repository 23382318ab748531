//! Rational-Rate Polyphase Resampler
//!
//! Converts between two integer sample rates with ratio `L:M` (interpolate by
//! `L`, decimate by `M`). One windowed-sinc low-pass is split into `L` phases
//! of `cpp` taps each. For every input sample the ring receives one value and
//! every phase index below `L` produces one output sample, so the number of
//! outputs per block varies and `execute` reports it.

use crate::dsp::fir::{fir_bandpass, ImpulseFormat, Window};
use crate::dsp::stage::{expect_bool, expect_f64, expect_usize, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Default cutoff as a fraction of the lower rate
const DEFAULT_CUTOFF: f64 = 0.45;

/// Default complex filter length: taps = FACTOR * full_rate / min_rate
const COMPLEX_TAP_FACTOR: f64 = 140.0;

/// Real filter length: taps = SPAN / normalized cutoff
const REAL_TAP_SPAN: f64 = 60.0;

fn gcd(mut x: u32, mut y: u32) -> u32 {
    while y != 0 {
        let z = y;
        y = x % y;
        x = z;
    }
    x
}

/// Largest number of samples one block of `size` inputs can produce
pub fn max_output_samples(size: usize, in_rate: u32, out_rate: u32) -> usize {
    let g = gcd(in_rate, out_rate).max(1) as usize;
    let (l, m) = (out_rate as usize / g, (in_rate as usize / g).max(1));
    (size * l).div_ceil(m) + 1
}

/// Polyphase tables and ring, shared by the complex and real variants
#[derive(Debug, Clone)]
struct Polyphase {
    /// 2 for interleaved complex, 1 for scalar
    channels: usize,
    in_rate: u32,
    out_rate: u32,
    fc: f64,
    gain: f64,
    l: usize,
    m: usize,
    ncoef: usize,
    cpp: usize,
    /// Phase-major taps: `h[phase * cpp + j]`
    h: Vec<f32>,
    ringsize: usize,
    ring: Vec<f32>,
    idx_in: usize,
    phnum: usize,
}

impl Polyphase {
    /// Design the filter.
    ///
    /// `fc == 0` selects 0.45 of the lower rate. `ncoef == None` selects the
    /// variant's default length.
    fn design(
        channels: usize,
        in_rate: u32,
        out_rate: u32,
        fc: f64,
        ncoef: Option<usize>,
        gain: f64,
    ) -> Self {
        let in_rate = in_rate.max(1);
        let out_rate = out_rate.max(1);
        let g = gcd(in_rate, out_rate);
        let l = (out_rate / g) as usize;
        let m = (in_rate / g) as usize;
        let min_rate = in_rate.min(out_rate) as f64;

        let fc = if fc > 0.0 { fc } else { DEFAULT_CUTOFF * min_rate };
        let full_rate = in_rate as f64 * l as f64;
        let fc_norm = fc / full_rate;
        let ncoef = match ncoef {
            Some(n) if n > 0 => n,
            _ if channels == 2 => (COMPLEX_TAP_FACTOR * full_rate / min_rate) as usize,
            _ => (REAL_TAP_SPAN / fc_norm) as usize,
        };
        let ncoef = (ncoef / l + 1) * l;
        let cpp = ncoef / l;

        let impulse = fir_bandpass(
            ncoef,
            -fc_norm,
            fc_norm,
            1.0,
            Window::BlackmanHarris7,
            ImpulseFormat::Real,
            gain * l as f64,
        );
        let mut h = vec![0.0; ncoef];
        for phase in 0..l {
            for (j, k) in (0..ncoef).step_by(l).enumerate() {
                h[phase * cpp + j] = impulse[phase + k];
            }
        }

        log::debug!(
            "resample: {} -> {} Hz, L={} M={} ncoef={} cpp={} fc={}",
            in_rate,
            out_rate,
            l,
            m,
            ncoef,
            cpp,
            fc
        );

        Self {
            channels,
            in_rate,
            out_rate,
            fc,
            gain,
            l,
            m,
            ncoef,
            cpp,
            h,
            ringsize: cpp,
            ring: vec![0.0; channels * cpp],
            idx_in: cpp - 1,
            phnum: 0,
        }
    }

    fn flush(&mut self) {
        self.ring.fill(0.0);
        self.idx_in = self.ringsize - 1;
        self.phnum = 0;
    }

    /// Resample `samples` input samples; returns the number written to `output`
    fn process(&mut self, input: &[f32], samples: usize, output: &mut [f32]) -> usize {
        let ch = self.channels;
        let capacity = output.len() / ch;
        let mut outsamps = 0;

        for frame in input[..ch * samples].chunks_exact(ch) {
            let base = ch * self.idx_in;
            self.ring[base..base + ch].copy_from_slice(frame);

            while self.phnum < self.l {
                let taps = &self.h[self.cpp * self.phnum..self.cpp * (self.phnum + 1)];
                let mut acc = [0.0_f32; 2];
                for (j, &coef) in taps.iter().enumerate() {
                    let mut idx = self.idx_in + j;
                    if idx >= self.ringsize {
                        idx -= self.ringsize;
                    }
                    for (c, a) in acc[..ch].iter_mut().enumerate() {
                        *a += coef * self.ring[ch * idx + c];
                    }
                }
                debug_assert!(outsamps < capacity, "resampler output buffer too small");
                if outsamps < capacity {
                    output[ch * outsamps..ch * (outsamps + 1)].copy_from_slice(&acc[..ch]);
                    outsamps += 1;
                }
                self.phnum += self.m;
            }
            self.phnum -= self.l;
            self.idx_in = if self.idx_in == 0 {
                self.ringsize - 1
            } else {
                self.idx_in - 1
            };
        }
        outsamps
    }

    fn params(&self) -> Value {
        json!({
            "in_rate": self.in_rate,
            "out_rate": self.out_rate,
            "fc": self.fc,
            "gain": self.gain,
            "interpolation": self.l,
            "decimation": self.m,
            "num_coefficients": self.ncoef,
        })
    }
}

#[derive(Debug)]
struct ResampleState {
    run: bool,
    buffers: StageBuffers,
    core: Polyphase,
    /// Copy of the input block when input and output alias
    scratch: Vec<f32>,
}

impl ResampleState {
    fn process(&mut self, io: BlockIo<'_>, size: usize) -> usize {
        let len = self.core.channels * size;
        match io {
            BlockIo::Split { input, output } => self.core.process(input, size, output),
            BlockIo::InPlace(buffer) => {
                self.scratch.clear();
                self.scratch.extend_from_slice(&buffer[..len]);
                self.core.process(&self.scratch, size, buffer)
            }
        }
    }

    fn execute(&mut self, pool: &mut BufferPool, available: usize) -> usize {
        let size = self.buffers.size.min(available);
        let io = pool.stage_block(&self.buffers);
        if self.run {
            self.process(io, size)
        } else {
            io.bypass(self.core.channels * size);
            size
        }
    }

    fn redesign(&mut self, in_rate: u32, out_rate: u32, fc: f64) {
        let ncoef = if self.core.channels == 2 { None } else { Some(0) };
        self.core = Polyphase::design(self.core.channels, in_rate, out_rate, fc, ncoef, self.core.gain);
    }
}

fn unknown_param(stage: &str, name: &str) -> StageError {
    StageError::UnknownParameter {
        stage: stage.to_string(),
        param: name.to_string(),
    }
}

// ============================================================================
// Complex resampler
// ============================================================================

/// Polyphase resampler for interleaved complex samples
///
/// A disabled resampler copies its block through unchanged and reports `size`.
#[derive(Debug)]
pub struct Resampler {
    state: Mutex<ResampleState>,
}

impl Resampler {
    /// Create a complex resampler.
    ///
    /// # Arguments
    /// * `fc` - Low-pass cutoff in Hz; `0.0` selects 0.45 of the lower rate
    /// * `ncoef` - Filter length; `0` selects the default for the rate pair
    /// * `gain` - Pass-band gain
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        buffers: StageBuffers,
        in_rate: u32,
        out_rate: u32,
        fc: f64,
        ncoef: usize,
        gain: f64,
    ) -> Self {
        Self {
            state: Mutex::new(ResampleState {
                run: enabled,
                buffers,
                core: Polyphase::design(2, in_rate, out_rate, fc, Some(ncoef), gain),
                scratch: Vec::with_capacity(2 * buffers.size),
            }),
        }
    }

    /// Redesign for a new rate pair; history is discarded
    pub fn set_rates(&self, in_rate: u32, out_rate: u32) {
        let mut st = lock(&self.state);
        let fc = st.core.fc;
        let keep_fc = fc < DEFAULT_CUTOFF * in_rate.min(out_rate) as f64;
        st.redesign(in_rate, out_rate, if keep_fc { fc } else { 0.0 });
    }

    /// Redesign with a new cutoff; history is discarded
    pub fn set_cutoff(&self, fc: f64) {
        let mut st = lock(&self.state);
        let (in_rate, out_rate) = (st.core.in_rate, st.core.out_rate);
        st.redesign(in_rate, out_rate, fc);
    }

    /// Interpolation and decimation factors `(L, M)`
    pub fn ratio(&self) -> (usize, usize) {
        let st = lock(&self.state);
        (st.core.l, st.core.m)
    }

    /// Output capacity needed for one block, in complex samples
    pub fn max_output(&self) -> usize {
        let st = lock(&self.state);
        max_output_samples(st.buffers.size, st.core.in_rate, st.core.out_rate)
    }
}

impl Stage for Resampler {
    impl_stage_common!("resample");

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        lock(&self.state).execute(pool, available)
    }

    fn flush(&self) {
        lock(&self.state).core.flush();
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        let mut params = st.core.params();
        params["enabled"] = json!(st.run);
        params["size"] = json!(st.buffers.size);
        params
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => self.set_enabled(expect_bool(name, value)?),
            "fc" => self.set_cutoff(expect_f64(name, value)?),
            "in_rate" => {
                let out_rate = lock(&self.state).core.out_rate;
                self.set_rates(expect_usize(name, value)? as u32, out_rate);
            }
            "out_rate" => {
                let in_rate = lock(&self.state).core.in_rate;
                self.set_rates(in_rate, expect_usize(name, value)? as u32);
            }
            _ => return Err(unknown_param(self.stage_type(), name)),
        }
        Ok(())
    }
}

// ============================================================================
// Real resampler
// ============================================================================

/// Polyphase resampler for scalar samples; `size` counts floats
#[derive(Debug)]
pub struct RealResampler {
    state: Mutex<ResampleState>,
}

impl RealResampler {
    pub fn new(enabled: bool, buffers: StageBuffers, in_rate: u32, out_rate: u32) -> Self {
        Self {
            state: Mutex::new(ResampleState {
                run: enabled,
                buffers,
                core: Polyphase::design(1, in_rate, out_rate, 0.0, None, 1.0),
                scratch: Vec::with_capacity(buffers.size),
            }),
        }
    }

    /// Redesign for a new rate pair; history is discarded
    pub fn set_rates(&self, in_rate: u32, out_rate: u32) {
        lock(&self.state).redesign(in_rate, out_rate, 0.0);
    }

    pub fn ratio(&self) -> (usize, usize) {
        let st = lock(&self.state);
        (st.core.l, st.core.m)
    }

    /// Output capacity needed for one block, in floats
    pub fn max_output(&self) -> usize {
        let st = lock(&self.state);
        max_output_samples(st.buffers.size, st.core.in_rate, st.core.out_rate)
    }
}

impl Stage for RealResampler {
    impl_stage_common!("resample_real");

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        lock(&self.state).execute(pool, available)
    }

    fn flush(&self) {
        lock(&self.state).core.flush();
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        let mut params = st.core.params();
        params["enabled"] = json!(st.run);
        params["size"] = json!(st.buffers.size);
        params
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "enabled" => self.set_enabled(expect_bool(name, value)?),
            "in_rate" => {
                let out_rate = lock(&self.state).core.out_rate;
                self.set_rates(expect_usize(name, value)? as u32, out_rate);
            }
            "out_rate" => {
                let in_rate = lock(&self.state).core.in_rate;
                self.set_rates(in_rate, expect_usize(name, value)? as u32);
            }
            _ => return Err(unknown_param(self.stage_type(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn test_gcd_and_capacity() {
        assert_eq!(gcd(48000, 8000), 8000);
        assert_eq!(gcd(44100, 48000), 300);
        assert_eq!(max_output_samples(1024, 48000, 8000), 172);
        assert_eq!(max_output_samples(1024, 24000, 48000), 2049);
    }

    #[test]
    fn test_derived_parameters() {
        let mut pool = BufferPool::new();
        let a = pool.allocate_complex(8);
        let b = pool.allocate_complex(32);
        let r = Resampler::new(true, StageBuffers::new(8, a, b), 24000, 48000, 0.0, 0, 1.0);
        assert_eq!(r.ratio(), (2, 1));
        let params = r.get_params();
        assert_eq!(params["num_coefficients"], 282);
        assert_eq!(params["fc"], 0.45 * 24000.0);
    }

    #[test]
    fn test_upsample_dc() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(256);
        let output = pool.allocate_complex(513);
        let r = Resampler::new(true, StageBuffers::new(256, input, output), 24000, 48000, 0.0, 0, 1.0);

        pool.write(input, &[0.75, -0.5].repeat(256));
        let mut produced = 0;
        for _ in 0..3 {
            produced = r.execute(&mut pool);
        }
        assert_eq!(produced, 512);
        for pair in pool.get(output).unwrap()[..2 * produced].chunks_exact(2) {
            assert!((pair[0] - 0.75).abs() < 1e-3, "I = {}", pair[0]);
            assert!((pair[1] + 0.5).abs() < 1e-3, "Q = {}", pair[1]);
        }
    }

    #[test]
    fn test_downsample_counts_and_gain() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(1000);
        let output = pool.allocate_complex(max_output_samples(1000, 48000, 8000));
        let r = Resampler::new(true, StageBuffers::new(1000, input, output), 48000, 8000, 0.0, 0, 2.0);

        pool.write(input, &[1.0, 0.0].repeat(1000));
        let total: usize = (0..12).map(|_| r.execute(&mut pool)).sum();
        assert_eq!(total, 2000);

        let out = pool.get(output).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-3);
        assert!(out[1].abs() < 1e-3);
    }

    #[test]
    fn test_in_place_matches_split() {
        let n = 128;
        let samples: Vec<f32> = (0..n)
            .flat_map(|t| {
                let a = TAU * 0.01 * t as f64;
                [a.cos() as f32, a.sin() as f32]
            })
            .collect();

        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(n);
        let output = pool.allocate_complex(3 * n);
        let shared = pool.allocate_complex(3 * n);
        let split = Resampler::new(true, StageBuffers::new(n, input, output), 16000, 48000, 0.0, 0, 1.0);
        let aliased = Resampler::new(true, StageBuffers::in_place(n, shared), 16000, 48000, 0.0, 0, 1.0);

        pool.write(input, &samples);
        pool.write(shared, &samples);
        let a = split.execute(&mut pool);
        let b = aliased.execute(&mut pool);
        assert_eq!(a, b);
        assert_eq!(&pool.get(output).unwrap()[..2 * a], &pool.get(shared).unwrap()[..2 * b]);
    }

    #[test]
    fn test_flush_restores_first_block() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(64);
        let output = pool.allocate_complex(256);
        let r = Resampler::new(true, StageBuffers::new(64, input, output), 48000, 44100, 0.0, 0, 1.0);
        pool.write(input, &(0..128).map(|k| (k as f32).sin()).collect::<Vec<_>>());

        let first_count = r.execute(&mut pool);
        let first = pool.get(output).unwrap()[..2 * first_count].to_vec();
        r.execute(&mut pool);
        r.flush();
        let again = r.execute(&mut pool);
        assert_eq!(again, first_count);
        assert_eq!(&pool.get(output).unwrap()[..2 * again], first.as_slice());
    }

    #[test]
    fn test_disabled_bypass_reports_size() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(32);
        let output = pool.allocate_complex(64);
        let samples: Vec<f32> = (0..64).map(|k| k as f32).collect();
        pool.write(input, &samples);

        let r = Resampler::new(false, StageBuffers::new(32, input, output), 24000, 48000, 0.0, 0, 1.0);
        assert_eq!(r.execute(&mut pool), 32);
        assert_eq!(&pool.get(output).unwrap()[..64], samples.as_slice());
    }

    #[test]
    fn test_real_resampler_dc() {
        let mut pool = BufferPool::new();
        let input = pool.allocate(480);
        let output = pool.allocate(max_output_samples(480, 48000, 16000));
        let r = RealResampler::new(true, StageBuffers::new(480, input, output), 48000, 16000);
        assert_eq!(r.ratio(), (1, 3));

        pool.write(input, &[0.25; 480]);
        let mut produced = 0;
        for _ in 0..4 {
            produced = r.execute(&mut pool);
        }
        assert_eq!(produced, 160);
        for &x in &pool.get(output).unwrap()[..produced] {
            assert!((x - 0.25).abs() < 1e-3, "x = {}", x);
        }
    }

    #[test]
    fn test_set_rates_redesigns() {
        let mut pool = BufferPool::new();
        let a = pool.allocate_complex(8);
        let b = pool.allocate_complex(64);
        let r = Resampler::new(true, StageBuffers::new(8, a, b), 48000, 48000, 0.0, 0, 1.0);
        assert_eq!(r.ratio(), (1, 1));
        r.set_param("out_rate", &json!(96000)).unwrap();
        assert_eq!(r.ratio(), (2, 1));
        assert_eq!(r.max_output(), 17);
        assert!(r.set_param("ratio", &json!(2)).is_err());
    }
}
