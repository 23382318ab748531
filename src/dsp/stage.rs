//! Stage trait definition
//!
//! Every processing unit in a chain implements [`Stage`]: construct once,
//! optionally reconfigure, execute once per block, flush on reset, drop at
//! teardown. Stages are shared as `Arc<dyn Stage>` between the real-time path
//! and any number of control paths, so every method takes `&self` and each
//! stage guards its own mutable state with a private lock.

use crate::engine::{BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Base trait for all DSP stages
pub trait Stage: Send + Sync {
    /// Process one full block from the input buffer to the output buffer.
    ///
    /// Returns the number of samples written to the output buffer. Fixed-rate
    /// stages return their block size; resamplers return a variable count.
    fn execute(&self, pool: &mut BufferPool) -> usize {
        self.execute_available(pool, usize::MAX)
    }

    /// Process only the first `available` input samples of the block.
    ///
    /// A chain passes the count produced by the previous stage, so stages
    /// behind a resampler never run on stale samples. Counts above the block
    /// size are clamped to it. Returns the number of samples written.
    fn execute_available(&self, pool: &mut BufferPool, available: usize) -> usize;

    /// Zero all history without touching coefficients or buffer assignment
    fn flush(&self);

    /// Reassign buffers and block size
    fn set_buffers(&self, buffers: StageBuffers);

    /// Current buffer assignment
    fn buffers(&self) -> StageBuffers;

    /// Get the stage type identifier
    fn stage_type(&self) -> &'static str;

    /// Check if stage is enabled
    fn is_enabled(&self) -> bool;

    /// Enable or disable the stage
    fn set_enabled(&self, enabled: bool);

    /// Get all parameters as JSON (for UI/control)
    fn get_params(&self) -> Value;

    /// Set a single parameter by name
    fn set_param(&self, name: &str, value: &Value) -> Result<()>;
}

/// Acquire a stage lock, recovering the state if a control thread panicked
/// while holding it.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rate substituted for a zero, negative or non-finite sample rate
pub(crate) const FALLBACK_RATE: f64 = 48000.0;

/// Keep a stage's sample rate usable as a divisor
pub(crate) fn clamp_rate(stage: &str, rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        log::warn!("{}: sample rate {} Hz is invalid, using {} Hz", stage, rate, FALLBACK_RATE);
        FALLBACK_RATE
    }
}

/// Extract an f64 parameter value or report a typed error
pub(crate) fn expect_f64(param: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| StageError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        expected: "number".to_string(),
    })
}

/// Extract a bool parameter value or report a typed error
pub(crate) fn expect_bool(param: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| StageError::InvalidParameter {
        param: param.to_string(),
        value: value.to_string(),
        expected: "bool".to_string(),
    })
}

/// Extract an unsigned integer parameter value or report a typed error
pub(crate) fn expect_usize(param: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| StageError::InvalidParameter {
            param: param.to_string(),
            value: value.to_string(),
            expected: "non-negative integer".to_string(),
        })
}

/// Helper macro to implement the lifecycle methods shared by every stage.
///
/// The implementing type must hold its state in `self.state: Mutex<_>` and that
/// state must have `run: bool` and `buffers: StageBuffers` fields.
#[macro_export]
macro_rules! impl_stage_common {
    ($stage_type:expr) => {
        fn stage_type(&self) -> &'static str {
            $stage_type
        }

        fn set_buffers(&self, buffers: $crate::engine::StageBuffers) {
            $crate::dsp::stage::lock(&self.state).buffers = buffers;
        }

        fn buffers(&self) -> $crate::engine::StageBuffers {
            $crate::dsp::stage::lock(&self.state).buffers
        }

        fn is_enabled(&self) -> bool {
            $crate::dsp::stage::lock(&self.state).run
        }

        fn set_enabled(&self, enabled: bool) {
            $crate::dsp::stage::lock(&self.state).run = enabled;
        }
    };
}
