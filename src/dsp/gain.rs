//! Gain Stage
//!
//! Independent in-phase and quadrature scale factors. Besides its own enable
//! flag the stage may observe a shared [`RunFlag`], so one control write can
//! switch several stages together.

use crate::dsp::stage::{expect_bool, expect_f64, lock, Stage};
use crate::engine::{BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Run flag shared between stages and control threads
pub type RunFlag = Arc<AtomicBool>;

/// Create a shared run flag
pub fn run_flag(initial: bool) -> RunFlag {
    Arc::new(AtomicBool::new(initial))
}

#[derive(Debug)]
struct GainState {
    run: bool,
    prun: Option<RunFlag>,
    buffers: StageBuffers,
    i_gain: f32,
    q_gain: f32,
}

impl GainState {
    fn active(&self) -> bool {
        self.run
            && self
                .prun
                .as_ref()
                .map_or(true, |flag| flag.load(Ordering::Acquire))
    }
}

/// I/Q gain stage
///
/// # Example
/// ```
/// use iqchain::dsp::{run_flag, GainStage, Stage};
/// use iqchain::engine::{BufferPool, StageBuffers};
/// use std::sync::atomic::Ordering;
///
/// let mut pool = BufferPool::new();
/// let buf = pool.allocate_complex(2);
/// pool.write(buf, &[1.0, 1.0, 1.0, 1.0]);
///
/// let flag = run_flag(true);
/// let gain = GainStage::new(true, Some(flag.clone()), StageBuffers::in_place(2, buf), 0.5, 2.0);
/// gain.execute(&mut pool);
/// assert_eq!(pool.get(buf).unwrap(), &[0.5, 2.0, 0.5, 2.0]);
///
/// flag.store(false, Ordering::Release);
/// gain.execute(&mut pool);
/// assert_eq!(pool.get(buf).unwrap(), &[0.5, 2.0, 0.5, 2.0]);
/// ```
#[derive(Debug)]
pub struct GainStage {
    state: Mutex<GainState>,
}

impl GainStage {
    pub fn new(
        enabled: bool,
        prun: Option<RunFlag>,
        buffers: StageBuffers,
        i_gain: f32,
        q_gain: f32,
    ) -> Self {
        Self {
            state: Mutex::new(GainState {
                run: enabled,
                prun,
                buffers,
                i_gain,
                q_gain,
            }),
        }
    }

    /// Set both gains to one level
    pub fn set_level(&self, level: f32) {
        self.set_gains(level, level);
    }

    /// Set the I and Q gains together
    pub fn set_gains(&self, i_gain: f32, q_gain: f32) {
        let mut st = lock(&self.state);
        st.i_gain = i_gain;
        st.q_gain = q_gain;
    }

    pub fn gains(&self) -> (f32, f32) {
        let st = lock(&self.state);
        (st.i_gain, st.q_gain)
    }

    /// Attach or detach a shared run flag
    pub fn set_run_flag(&self, prun: Option<RunFlag>) {
        lock(&self.state).prun = prun;
    }

    /// Check whether the stage would process on the next execute
    pub fn is_active(&self) -> bool {
        lock(&self.state).active()
    }
}

impl Stage for GainStage {
    impl_stage_common!("gain");

    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize {
        let st = lock(&self.state);
        let size = st.buffers.size.min(available);
        let io = pool.stage_block(&st.buffers);
        if st.active() {
            let (gi, gq) = (st.i_gain, st.q_gain);
            io.map_iq(size, |i, q| (gi * i, gq * q));
        } else {
            io.bypass(2 * size);
        }
        size
    }

    fn flush(&self) {}

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        json!({
            "enabled": st.run,
            "size": st.buffers.size,
            "i_gain": st.i_gain,
            "q_gain": st.q_gain,
            "shared_run": st.prun.as_ref().map(|f| f.load(Ordering::Acquire)),
        })
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "level" => self.set_level(expect_f64(name, value)? as f32),
            "i_gain" => {
                let v = expect_f64(name, value)? as f32;
                lock(&self.state).i_gain = v;
            }
            "q_gain" => {
                let v = expect_f64(name, value)? as f32;
                lock(&self.state).q_gain = v;
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
