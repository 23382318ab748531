//! Second-order section shared by the notch and peaking filters
//!
//! Difference equation (feedback terms carry their sign in `b1`/`b2`):
//! `y[n] = a0*x[n] + a1*x[n-1] + a2*x[n-2] + b1*y[n-1] + b2*y[n-2]`

use std::f64::consts::TAU;

/// Lowest center frequency accepted by the closed-form designs, in Hz
const MIN_CENTER_HZ: f64 = 1.0;

/// Highest center frequency as a fraction of the sample rate
const MAX_CENTER_FRACTION: f64 = 0.49;

/// Biquad coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b1: f64,
    pub b2: f64,
}

impl Default for Biquad {
    /// Identity section
    fn default() -> Self {
        Self {
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
        }
    }
}

impl Biquad {
    /// Constant-bandwidth notch at `fn_norm` cycles/sample with pole radius `qr`.
    ///
    /// Zeros sit on the unit circle at the notch frequency; `qk` normalizes DC gain to one.
    pub fn notch(fn_norm: f64, qr: f64) -> Self {
        let csn = (TAU * fn_norm).cos();
        let qk = notch_gain(csn, qr);
        Self {
            a0: qk,
            a1: -2.0 * qk * csn,
            a2: qk,
            b1: 2.0 * qr * csn,
            b2: -qr * qr,
        }
    }

    /// Complement of [`Biquad::notch`]: unity at the center, zero at DC
    pub fn peak(fn_norm: f64, qr: f64) -> Self {
        let csn = (TAU * fn_norm).cos();
        let qk = notch_gain(csn, qr);
        Self {
            a0: 1.0 - qk,
            a1: 2.0 * (qk - qr) * csn,
            a2: qr * qr - qk,
            b1: 2.0 * qr * csn,
            b2: -qr * qr,
        }
    }

    /// Magnitude response at `fn_norm` cycles/sample
    pub fn magnitude(&self, fn_norm: f64) -> f64 {
        let w = TAU * fn_norm;
        let (c1, s1) = (w.cos(), -w.sin());
        let (c2, s2) = ((2.0 * w).cos(), -(2.0 * w).sin());
        let num = (
            self.a0 + self.a1 * c1 + self.a2 * c2,
            self.a1 * s1 + self.a2 * s2,
        );
        let den = (
            1.0 - self.b1 * c1 - self.b2 * c2,
            -self.b1 * s1 - self.b2 * s2,
        );
        (num.0.hypot(num.1)) / (den.0.hypot(den.1))
    }
}

fn notch_gain(csn: f64, qr: f64) -> f64 {
    (1.0 - 2.0 * qr * csn + qr * qr) / (2.0 * (1.0 - csn))
}

/// Delay state of one section for one real channel
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadHistory {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadHistory {
    /// Filter one sample and shift the delay state
    #[inline]
    pub fn tick(&mut self, c: &Biquad, x0: f64) -> f64 {
        let y0 = c.a0 * x0 + c.a1 * self.x1 + c.a2 * self.x2 + c.b1 * self.y1 + c.b2 * self.y2;
        self.y2 = self.y1;
        self.y1 = y0;
        self.x2 = self.x1;
        self.x1 = x0;
        y0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Keep a center frequency inside the range where the designs are defined
pub(crate) fn clamp_center(stage: &str, freq: f64, rate: f64) -> f64 {
    let max = MAX_CENTER_FRACTION * rate;
    if freq < MIN_CENTER_HZ || freq > max || freq.is_nan() {
        let clamped = if freq.is_nan() {
            MIN_CENTER_HZ
        } else {
            freq.min(max).max(MIN_CENTER_HZ)
        };
        log::warn!("{}: center {} Hz out of range, using {} Hz", stage, freq, clamped);
        clamped
    } else {
        freq
    }
}
