//! Frequency Shifter
//!
//! Rotates every complex sample by a running phase, moving the spectrum by a
//! constant offset. Trigonometry is evaluated once per block; inside the block
//! the rotation advances by the angle-addition recurrence.

use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde_json::{json, Value};
use std::f64::consts::TAU;
use std::sync::Mutex;

#[derive(Debug)]
struct ShiftState {
    run: bool,
    buffers: StageBuffers,
    rate: f64,
    shift: f64,
    /// Running phase, kept in [0, 2π)
    phase: f64,
    delta: f64,
    cos_delta: f64,
    sin_delta: f64,
}

impl ShiftState {
    fn calc(&mut self) {
        self.phase = 0.0;
        self.delta = TAU * self.shift / self.rate;
        self.cos_delta = self.delta.cos();
        self.sin_delta = self.delta.sin();
    }

    fn process(&mut self, io: BlockIo<'_>, size: usize) {
        let mut cos_phase = self.phase.cos();
        let mut sin_phase = self.phase.sin();
        let (cos_delta, sin_delta, delta) = (self.cos_delta, self.sin_delta, self.delta);
        let phase = &mut self.phase;

        io.map_iq(size, |i, q| {
            let (i, q) = (i as f64, q as f64);
            let out = (
                (i * cos_phase - q * sin_phase) as f32,
                (i * sin_phase + q * cos_phase) as f32,
            );

            let (c, s) = (cos_phase, sin_phase);
            cos_phase = c * cos_delta - s * sin_delta;
            sin_phase = c * sin_delta + s * cos_delta;

            *phase += delta;
            if *phase >= TAU {
                *phase -= TAU;
            }
            if *phase < 0.0 {
                *phase += TAU;
            }
            out
        });
    }
}

/// Complex frequency shifter
#[derive(Debug)]
pub struct FrequencyShifter {
    state: Mutex<ShiftState>,
}

impl FrequencyShifter {
    /// Create a shifter moving the spectrum by `shift` Hz (negative shifts down)
    pub fn new(enabled: bool, buffers: StageBuffers, rate: f64, shift: f64) -> Self {
        let mut state = ShiftState {
            run: enabled,
            buffers,
            rate: clamp_rate("shift", rate),
            shift,
            phase: 0.0,
            delta: 0.0,
            cos_delta: 1.0,
            sin_delta: 0.0,
        };
        state.calc();
        Self {
            state: Mutex::new(state),
        }
    }

    /// Set the shift frequency in Hz. Restarts the oscillator at phase zero.
    pub fn set_freq(&self, shift: f64) {
        let mut st = lock(&self.state);
        st.shift = shift;
        st.calc();
        log::debug!("shift: {} Hz, delta {:.6} rad/sample", shift, st.delta);
    }

    /// Current shift frequency in Hz
    pub fn freq(&self) -> f64 {
        lock(&self.state).shift
    }

    /// Current oscillator phase in radians
    pub fn phase(&self) -> f64 {
        lock(&self.state).phase
    }
}

impl Stage for FrequencyShifter {
    impl_stage_common!("shift");

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
        lock(&self.state).phase = 0.0;
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "rate": st.rate,
            "freq": st.shift,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "freq" | "shift" => {
                self.set_freq(expect_f64(name, value)?);
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
    use crate::engine::magnitudes;

    const RATE: f64 = 48000.0;

    fn ramp(n: usize) -> Vec<f32> {
        (0..2 * n).map(|k| ((k * 37 % 101) as f32 - 50.0) / 50.0).collect()
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(128);
        let output = pool.allocate_complex(128);
        let samples = ramp(128);
        pool.write(input, &samples);

        let shifter = FrequencyShifter::new(true, StageBuffers::new(128, input, output), RATE, 0.0);
        for _ in 0..3 {
            shifter.execute(&mut pool);
            assert_eq!(pool.get(output).unwrap(), samples.as_slice());
        }
    }

    #[test]
    fn test_dc_becomes_tone() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(64);
        pool.write(buf, &[1.0, 0.0].repeat(64));

        let freq = 1500.0;
        let shifter = FrequencyShifter::new(true, StageBuffers::in_place(64, buf), RATE, freq);
        shifter.execute(&mut pool);

        let out = pool.get(buf).unwrap();
        for t in 0..64 {
            let arg = TAU * freq * t as f64 / RATE;
            assert!((out[2 * t] as f64 - arg.cos()).abs() < 1e-5);
            assert!((out[2 * t + 1] as f64 - arg.sin()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_phase_continues_across_blocks() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(100);
        let freq = -700.0;
        let shifter = FrequencyShifter::new(true, StageBuffers::in_place(100, buf), RATE, freq);

        let mut collected = Vec::new();
        for _ in 0..4 {
            pool.write(buf, &[0.0, 1.0].repeat(100));
            shifter.execute(&mut pool);
            collected.extend_from_slice(pool.get(buf).unwrap());
        }

        // j * e^{jθ} = (-sin θ, cos θ)
        for t in 0..400 {
            let arg = TAU * freq * t as f64 / RATE;
            assert!((collected[2 * t] as f64 + arg.sin()).abs() < 1e-4);
            assert!((collected[2 * t + 1] as f64 - arg.cos()).abs() < 1e-4);
        }
        let phase = shifter.phase();
        assert!((0.0..TAU).contains(&phase));
    }

    #[test]
    fn test_magnitude_preserved() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(256);
        let output = pool.allocate_complex(256);
        let samples = ramp(256);
        pool.write(input, &samples);
        let expected = magnitudes(&samples);

        let shifter = FrequencyShifter::new(true, StageBuffers::new(256, input, output), RATE, 12345.6);
        for _ in 0..50 {
            shifter.execute(&mut pool);
            for (got, want) in magnitudes(pool.get(output).unwrap()).iter().zip(&expected) {
                assert!((got - want).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_set_freq_and_flush_reset_phase() {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(33);
        let shifter = FrequencyShifter::new(true, StageBuffers::in_place(33, buf), RATE, 1000.0);
        shifter.execute(&mut pool);
        assert!(shifter.phase() > 0.0);

        shifter.flush();
        assert_eq!(shifter.phase(), 0.0);

        shifter.execute(&mut pool);
        shifter.set_param("freq", &json!(2000.0)).unwrap();
        assert_eq!(shifter.phase(), 0.0);
        assert_eq!(shifter.freq(), 2000.0);
        assert!(shifter.set_param("gain", &json!(1.0)).is_err());
    }

    #[test]
    fn test_disabled_bypass() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(16);
        let output = pool.allocate_complex(16);
        let samples = ramp(16);
        pool.write(input, &samples);

        let shifter = FrequencyShifter::new(false, StageBuffers::new(16, input, output), RATE, 900.0);
        shifter.execute(&mut pool);
        assert_eq!(pool.get(output).unwrap(), samples.as_slice());
        assert_eq!(shifter.phase(), 0.0);
    }
}
