//! Fractional Delay Line
//!
//! Fixed time delay with sub-sample resolution, realized by a polyphase FIR
//! interpolator. The ring index runs backwards: each new sample is written one
//! slot below the previous one, so ring offset `+k` from the write position is
//! the sample `k` periods old.
//!
//! The interpolator is causal, so every output lags the input by a fixed
//! filter latency on top of the requested delay. See [`Delay::latency`].

use crate::dsp::fir::{fir_bandpass, ImpulseFormat, Window};
use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Number of supported whole-sample delays
pub const WHOLE_SAMPLE_DELAYS: usize = 1025;

/// Interpolation filter cutoff as a fraction of the input Nyquist band
const RELATIVE_CUTOFF: f64 = 0.45;

/// Filter span factor: taps = SPAN / (normalized transition)
const FILTER_SPAN: f64 = 60.0;

/// Finest supported time resolution, as sub-samples per input sample
pub const MAX_INTERPOLATION: usize = 1024;

/// Interpolation factor for a time resolution, clamped to `[1, MAX_INTERPOLATION]`
fn interpolation_factor(tdelta: f64, rate: f64) -> usize {
    let l = 0.5 + 1.0 / (tdelta * rate);
    if l.is_nan() || l < 0.5 {
        log::warn!("delay: resolution {} s at {} Hz is invalid, using L=1", tdelta, rate);
        1
    } else if l >= (MAX_INTERPOLATION + 1) as f64 {
        log::warn!(
            "delay: resolution {} s at {} Hz is too fine, using L={}",
            tdelta,
            rate,
            MAX_INTERPOLATION
        );
        MAX_INTERPOLATION
    } else {
        (l as usize).max(1)
    }
}

#[derive(Debug)]
struct DelayState {
    run: bool,
    buffers: StageBuffers,
    rate: f64,
    /// Requested time resolution in seconds
    tdelta: f64,
    /// Requested delay in seconds
    tdelay: f64,
    /// Interpolation factor
    l: usize,
    ncoef: usize,
    /// Coefficients per phase
    cpp: usize,
    /// Sub-sample phase index
    phnum: usize,
    /// Whole-sample delay
    snum: usize,
    idx_in: usize,
    adelta: f64,
    adelay: f64,
    h: Vec<f32>,
    rsize: usize,
    ring: Vec<f32>,
}

impl DelayState {
    /// Split the requested delay into whole samples and a phase index
    fn calc_split(&mut self) {
        let mut steps = (0.5 + self.tdelay.max(0.0) / self.adelta) as usize;
        let max_steps = (self.rsize - self.cpp) * self.l;
        if steps > max_steps {
            log::warn!(
                "delay of {} s exceeds {} whole samples, clamping",
                self.tdelay,
                self.rsize - self.cpp
            );
            steps = max_steps;
        }
        self.snum = steps / self.l;
        self.phnum = steps % self.l;
        self.adelay = self.adelta * steps as f64;
    }

    fn process(&mut self, io: BlockIo<'_>, size: usize) {
        let DelayState {
            l,
            cpp,
            phnum,
            snum,
            idx_in,
            h,
            rsize,
            ring,
            ..
        } = self;
        let (l, cpp, phnum, snum, rsize) = (*l, *cpp, *phnum, *snum, *rsize);

        io.map_iq(size, |i_in, q_in| {
            ring[2 * *idx_in] = i_in;
            ring[2 * *idx_in + 1] = q_in;

            // Tap j reads the sample snum + j periods old
            let mut n = *idx_in + snum;
            if n >= rsize {
                n -= rsize;
            }

            let (mut i_acc, mut q_acc) = (0.0_f32, 0.0_f32);
            for coef in h[l - 1 - phnum..].iter().step_by(l).take(cpp) {
                i_acc += ring[2 * n] * coef;
                q_acc += ring[2 * n + 1] * coef;
                n += 1;
                if n == rsize {
                    n = 0;
                }
            }

            *idx_in = if *idx_in == 0 { rsize - 1 } else { *idx_in - 1 };
            (i_acc, q_acc)
        });
    }
}

/// Fractional-sample delay line
///
/// # Example
/// ```
/// use iqchain::dsp::{Delay, Stage};
/// use iqchain::engine::{BufferPool, StageBuffers};
///
/// let mut pool = BufferPool::new();
/// let buf = pool.allocate_complex(256);
/// let rate = 48_000.0;
/// let delay = Delay::new(true, StageBuffers::in_place(256, buf), rate, 1.0 / (8.0 * rate), 0.004);
/// let realized = delay.set_delay(0.0041);
/// assert!((realized - 0.0041).abs() <= 1.0 / (8.0 * rate));
/// assert!(delay.latency() > 0.0);
/// delay.execute(&mut pool);
/// ```
#[derive(Debug)]
pub struct Delay {
    state: Mutex<DelayState>,
}

impl Delay {
    /// Create a delay line.
    ///
    /// # Arguments
    /// * `tdelta` - Time resolution in seconds; sets the interpolation factor,
    ///   clamped to `[1, MAX_INTERPOLATION]`
    /// * `tdelay` - Requested delay in seconds
    pub fn new(enabled: bool, buffers: StageBuffers, rate: f64, tdelta: f64, tdelay: f64) -> Self {
        let rate = clamp_rate("delay", rate);
        let l = interpolation_factor(tdelta, rate);
        let ft = RELATIVE_CUTOFF / l as f64;
        let ncoef = ((FILTER_SPAN / ft) as usize / l + 1) * l;
        let cpp = ncoef / l;
        let rsize = cpp + (WHOLE_SAMPLE_DELAYS - 1);
        let h = fir_bandpass(
            ncoef,
            -ft,
            ft,
            1.0,
            Window::BlackmanHarris7,
            ImpulseFormat::Real,
            l as f64,
        );

        let mut state = DelayState {
            run: enabled,
            buffers,
            rate,
            tdelta,
            tdelay,
            l,
            ncoef,
            cpp,
            phnum: 0,
            snum: 0,
            idx_in: 0,
            adelta: 1.0 / (rate * l as f64),
            adelay: 0.0,
            h,
            rsize,
            ring: vec![0.0; 2 * rsize],
        };
        state.calc_split();

        log::debug!(
            "delay: L={} ncoef={} cpp={} ring={} realized={:.9}s",
            l,
            ncoef,
            cpp,
            rsize,
            state.adelay
        );

        Self {
            state: Mutex::new(state),
        }
    }

    /// Change the delay; returns the realized delay on the polyphase grid
    pub fn set_delay(&self, tdelay: f64) -> f64 {
        let mut st = lock(&self.state);
        st.tdelay = tdelay;
        st.calc_split();
        st.adelay
    }

    /// Requested delay in seconds
    pub fn delay(&self) -> f64 {
        lock(&self.state).tdelay
    }

    /// Realized delay in seconds
    pub fn realized_delay(&self) -> f64 {
        lock(&self.state).adelay
    }

    /// Fixed latency of the interpolation filter in seconds.
    ///
    /// Output sample `t` is the input at `t - (realized_delay() + latency())`,
    /// so a zero delay still lags by this amount.
    pub fn latency(&self) -> f64 {
        let st = lock(&self.state);
        ((st.ncoef - 1) as f64 / 2.0 - (st.l - 1) as f64) * st.adelta
    }

    /// Interpolation factor `L`
    pub fn interpolation(&self) -> usize {
        lock(&self.state).l
    }

    /// Total interpolation filter taps
    pub fn num_coefficients(&self) -> usize {
        lock(&self.state).ncoef
    }
}

impl Stage for Delay {
    impl_stage_common!("delay");

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
        st.ring.fill(0.0);
        st.idx_in = 0;
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "rate": st.rate,
            "tdelta": st.tdelta,
            "delay": st.tdelay,
            "realized_delay": st.adelay,
            "latency": ((st.ncoef - 1) as f64 / 2.0 - (st.l - 1) as f64) * st.adelta,
            "interpolation": st.l,
            "num_coefficients": st.ncoef,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "delay" => {
                self.set_delay(expect_f64(name, value)?);
                Ok(())
            }
            "enabled" => {
                self.set_enabled(expect_bool(name, value)?);
                Ok(())
            }
            _ => Err(StageError::UnknownParameter {
                stage: self.stage_type().to_string(),
                param: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const RATE: f64 = 48000.0;
    const TDELTA: f64 = 1.0 / (8.0 * RATE);

    fn tone(n: usize, freq: f64, start: usize) -> Vec<f32> {
        (start..start + n)
            .flat_map(|t| {
                let arg = 2.0 * PI * freq * t as f64 / RATE;
                [arg.cos() as f32, arg.sin() as f32]
            })
            .collect()
    }

    #[test]
    fn test_derived_parameters() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(64);
        let delay = Delay::new(true, StageBuffers::in_place(64, buf), RATE, TDELTA, 0.0);
        assert_eq!(delay.interpolation(), 8);
        assert_eq!(delay.num_coefficients() % 8, 0);
        assert_eq!(delay.num_coefficients(), 1072);
    }

    #[test]
    fn test_realized_delay_on_grid() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(64);
        let delay = Delay::new(true, StageBuffers::in_place(64, buf), RATE, TDELTA, 0.0);
        for requested in [0.0, 1.3e-4, 2.0e-3, 7.77e-3] {
            let realized = delay.set_delay(requested);
            assert!((realized - requested).abs() <= TDELTA / 2.0 + 1e-12);
            let steps = realized / TDELTA;
            assert!((steps - steps.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_delay_lags_by_latency() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(512);
        let delay = Delay::new(true, StageBuffers::in_place(512, buf), RATE, TDELTA, 0.0);
        assert_eq!(delay.realized_delay(), 0.0);

        // 535.5 taps of group delay minus the L - 1 phase offset, in sub-samples
        let lag = delay.latency() * RATE;
        assert!((lag - 528.5 / 8.0).abs() < 1e-9, "lag = {}", lag);

        let freq = 500.0;
        for block in 0..3 {
            pool.write(buf, &tone(512, freq, 512 * block));
            delay.execute(&mut pool);
        }
        let out = pool.get(buf).unwrap();
        for k in 0..512 {
            let t = (1024 + k) as f64 - lag;
            let arg = 2.0 * PI * freq * t / RATE;
            assert!((out[2 * k] as f64 - arg.cos()).abs() < 2e-3, "I mismatch at {}", k);
            assert!((out[2 * k + 1] as f64 - arg.sin()).abs() < 2e-3, "Q mismatch at {}", k);
        }
    }

    #[test]
    fn test_degenerate_resolution_is_clamped() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(64);
        for (tdelta, expected) in [
            (0.0, MAX_INTERPOLATION),
            (1e-12, MAX_INTERPOLATION),
            (f64::INFINITY, 1),
            (-1e-3, 1),
            (f64::NAN, 1),
        ] {
            let delay = Delay::new(true, StageBuffers::in_place(64, buf), RATE, tdelta, 1e-3);
            assert_eq!(delay.interpolation(), expected, "tdelta = {}", tdelta);
            assert!((delay.realized_delay() - 1e-3).abs() <= 0.5 / RATE);

            pool.write(buf, &tone(64, 900.0, 0));
            assert_eq!(delay.execute(&mut pool), 64);
            assert!(pool.get(buf).unwrap().iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_delay_clamped_to_ring() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(64);
        let delay = Delay::new(true, StageBuffers::in_place(64, buf), RATE, TDELTA, 0.0);
        let longest = (WHOLE_SAMPLE_DELAYS - 1) as f64 / RATE;
        assert!((delay.set_delay(1.0) - longest).abs() < 1e-12);
        assert_eq!(delay.set_delay(f64::NAN), 0.0);
        assert_eq!(delay.execute(&mut pool), 64);
    }

    #[test]
    fn test_fractional_delay_of_tone() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(1024);
        let output = pool.allocate_complex(1024);
        let tdelay = 200.375 / RATE;
        let delay = Delay::new(true, StageBuffers::new(1024, input, output), RATE, TDELTA, tdelay);

        let align = (delay.realized_delay() + delay.latency()) * RATE;
        let freq = 500.0;
        pool.write(input, &tone(1024, freq, 0));
        delay.execute(&mut pool);

        let out = pool.get(output).unwrap();
        for t in 400..1024 {
            let arg = 2.0 * PI * freq * (t as f64 - align) / RATE;
            assert!((out[2 * t] as f64 - arg.cos()).abs() < 2e-3, "I mismatch at {}", t);
            assert!((out[2 * t + 1] as f64 - arg.sin()).abs() < 2e-3, "Q mismatch at {}", t);
        }
    }

    #[test]
    fn test_disabled_bypass() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(32);
        let output = pool.allocate_complex(32);
        let samples = tone(32, 1000.0, 0);
        pool.write(input, &samples);

        let delay = Delay::new(false, StageBuffers::new(32, input, output), RATE, TDELTA, 1e-3);
        assert_eq!(delay.execute(&mut pool), 32);
        assert_eq!(pool.get(output).unwrap(), samples.as_slice());

        // In place: untouched
        delay.set_buffers(StageBuffers::in_place(32, input));
        delay.execute(&mut pool);
        assert_eq!(pool.get(input).unwrap(), samples.as_slice());
    }

    #[test]
    fn test_flush_matches_fresh_stage() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(256);
        let output = pool.allocate_complex(256);
        let bufs = StageBuffers::new(256, input, output);
        let used = Delay::new(true, bufs, RATE, TDELTA, 150.0 / RATE);

        pool.write(input, &tone(256, 700.0, 0));
        used.execute(&mut pool);
        used.execute(&mut pool);
        used.flush();

        let probe = tone(256, 1300.0, 17);
        pool.write(input, &probe);
        used.execute(&mut pool);
        let after_flush = pool.get(output).unwrap().to_vec();

        let fresh = Delay::new(true, bufs, RATE, TDELTA, 150.0 / RATE);
        pool.write(input, &probe);
        fresh.execute(&mut pool);
        assert_eq!(pool.get(output).unwrap(), after_flush.as_slice());
    }

    #[test]
    fn test_set_param() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(8);
        let delay = Delay::new(true, StageBuffers::in_place(8, buf), RATE, TDELTA, 0.0);
        delay.set_param("delay", &json!(1e-3)).unwrap();
        assert!((delay.realized_delay() - 1e-3).abs() <= TDELTA);
        assert!(delay.set_param("delay", &json!("soon")).is_err());
        assert!(delay.set_param("feedback", &json!(0.5)).is_err());
        assert_eq!(delay.get_params()["interpolation"], 8);
    }
}
