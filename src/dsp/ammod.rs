//! AM Modulator
//!
//! Transmit-side amplitude modulation of a baseband block. The carrier level
//! `c` and the audio level `1 - c` always sum to one.

use crate::dsp::stage::{expect_bool, expect_f64, lock, Stage};
use crate::engine::{BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::Mutex;

/// Modulation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmMode {
    /// Double sideband with carrier
    #[default]
    Am,
    /// Double sideband, suppressed carrier
    Dsb,
    /// Single sideband input with re-inserted carrier
    SsbCarrier,
}

#[derive(Debug)]
struct AmState {
    run: bool,
    buffers: StageBuffers,
    mode: AmMode,
    c_level: f32,
    a_level: f32,
}

/// AM/DSB/SSB-with-carrier modulator stage
#[derive(Debug)]
pub struct AmModulator {
    state: Mutex<AmState>,
}

impl AmModulator {
    pub fn new(enabled: bool, buffers: StageBuffers, mode: AmMode, carrier_level: f32) -> Self {
        let c_level = clamp_level(carrier_level);
        Self {
            state: Mutex::new(AmState {
                run: enabled,
                buffers,
                mode,
                c_level,
                a_level: 1.0 - c_level,
            }),
        }
    }

    /// Set the carrier level in `[0, 1]`
    pub fn set_carrier_level(&self, level: f32) {
        let mut st = lock(&self.state);
        st.c_level = clamp_level(level);
        st.a_level = 1.0 - st.c_level;
    }

    pub fn set_mode(&self, mode: AmMode) {
        lock(&self.state).mode = mode;
    }

    pub fn carrier_level(&self) -> f32 {
        lock(&self.state).c_level
    }

    pub fn mode(&self) -> AmMode {
        lock(&self.state).mode
    }
}

fn clamp_level(level: f32) -> f32 {
    if (0.0..=1.0).contains(&level) {
        level
    } else {
        let clamped = if level > 1.0 { 1.0 } else { 0.0 };
        log::warn!("am_mod: carrier level {} out of range, using {}", level, clamped);
        clamped
    }
}

impl Stage for AmModulator {
    impl_stage_common!("am_mod");

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        let st = lock(&self.state);
        let size = st.buffers.size.min(available);
        let io = pool.stage_block(&st.buffers);
        if !st.run {
            io.bypass(2 * size);
            return size;
        }

        let mult = FRAC_1_SQRT_2;
        let (c, a) = (st.c_level, st.a_level);
        match st.mode {
            AmMode::Am => io.map_iq(size, |i, _| {
                let y = mult * (c + a * i);
                (y, y)
            }),
            AmMode::Dsb => io.map_iq(size, |i, _| (mult * i, mult * i)),
            AmMode::SsbCarrier => io.map_iq(size, |i, q| (mult * c + a * i, mult * c + a * q)),
        }
        size
    }

    fn flush(&self) {}

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "mode": st.mode,
            "carrier_level": st.c_level,
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "carrier_level" => self.set_carrier_level(expect_f64(name, value)? as f32),
            "mode" => {
                let mode = serde_json::from_value(value.clone()).map_err(|_| {
                    StageError::InvalidParameter {
                        param: name.to_string(),
                        value: value.to_string(),
                        expected: "\"am\", \"dsb\" or \"ssb_carrier\"".to_string(),
                    }
                })?;
                self.set_mode(mode);
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
