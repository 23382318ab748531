//! FIR Design and Convolution Kernels
//!
//! Frequency-sampling and windowed-sinc bandpass synthesis, plus conversion of
//! an impulse response into the frequency-domain multipliers used by
//! overlap-save convolution.
//!
//! Impulse layout: [`ImpulseFormat::Real`] returns `N` real taps,
//! [`ImpulseFormat::Complex`] returns `2N` floats of interleaved complex taps.

use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const TWO_PI: f64 = 2.0 * PI;

/// 4-term Blackman-Harris coefficients, highest order last
const BH4: [f64; 4] = [0.21747, -0.45325, 0.28256, -0.04672];

/// 7-term Blackman-Harris coefficients, highest order last
const BH7: [f64; 7] = [
    6.3964424114390378e-02,
    -2.3993864599352804e-01,
    3.5015956323820469e-01,
    -2.4774111897080783e-01,
    8.5438256055858031e-02,
    -1.2320203369293225e-02,
    4.3778825791773474e-04,
];

/// Smoothing window applied to designed impulses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// 4-term Blackman-Harris
    BlackmanHarris4,
    /// 7-term Blackman-Harris
    #[default]
    BlackmanHarris7,
    /// No smoothing
    Rectangular,
}

impl Window {
    /// Map a numeric window index; unknown indices fall back to rectangular
    pub fn from_index(index: i64) -> Self {
        match index {
            0 => Window::BlackmanHarris4,
            1 => Window::BlackmanHarris7,
            other => {
                log::warn!("unknown window index {}, using rectangular", other);
                Window::Rectangular
            }
        }
    }

    /// Numeric index of this window
    pub fn index(self) -> i64 {
        match self {
            Window::BlackmanHarris4 => 0,
            Window::BlackmanHarris7 => 1,
            Window::Rectangular => 2,
        }
    }

    /// Window value for `cos_phi = cos(2*pi*i / (N - 1))`.
    ///
    /// The series is evaluated in Horner form over powers of `cos_phi`.
    #[inline]
    fn eval(self, cos_phi: f64) -> f64 {
        let coeffs: &[f64] = match self {
            Window::BlackmanHarris4 => &BH4,
            Window::BlackmanHarris7 => &BH7,
            Window::Rectangular => return 1.0,
        };
        coeffs.iter().rev().fold(0.0, |acc, &c| acc * cos_phi + c)
    }

    /// Sample the window over `n` points
    pub fn samples(self, n: usize) -> Vec<f64> {
        if n < 2 {
            return vec![1.0; n];
        }
        let arg0 = TWO_PI / (n as f64 - 1.0);
        (0..n).map(|i| self.eval((arg0 * i as f64).cos())).collect()
    }
}

/// Output representation of a designed impulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpulseFormat {
    /// `N` real taps
    #[default]
    Real,
    /// `N` interleaved complex taps
    Complex,
}

fn apply_window(taps: &[f64], window: Window, format: ImpulseFormat, scale: f64) -> Vec<f32> {
    let win = window.samples(taps.len());
    match format {
        ImpulseFormat::Real => taps
            .iter()
            .zip(&win)
            .map(|(&t, &w)| (scale * t * w) as f32)
            .collect(),
        ImpulseFormat::Complex => taps
            .iter()
            .zip(&win)
            .flat_map(|(&t, &w)| [(scale * t * w) as f32, 0.0])
            .collect(),
    }
}

/// Frequency-sampling design for odd `n`, evaluated with an inverse FFT.
///
/// `magnitudes` holds the desired response at bins `0..=(n-1)/2`. The result is
/// a linear-phase impulse centered at `(n-1)/2`. A zero length yields no taps.
pub fn fir_fsamp_odd(
    n: usize,
    magnitudes: &[f32],
    format: ImpulseFormat,
    scale: f64,
    window: Window,
) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let mid = (n - 1) / 2;
    let local_scale = 1.0 / n as f64;
    let mut spectrum = vec![Complex::new(0.0_f64, 0.0); n];

    for (i, bin) in spectrum.iter_mut().enumerate().take(mid + 1) {
        let mag = magnitudes.get(i).copied().unwrap_or(0.0) as f64 * local_scale;
        let phs = -(mid as f64) * TWO_PI * i as f64 / n as f64;
        *bin = Complex::from_polar(mag, phs);
    }
    for (j, i) in (mid + 1..n).enumerate() {
        spectrum[i] = spectrum[mid - j].conj();
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(n).process(&mut spectrum);

    let taps: Vec<f64> = spectrum.iter().map(|c| c.re).collect();
    apply_window(&taps, window, format, scale)
}

/// Frequency-sampling design by direct cosine summation; `n` may be odd or even.
///
/// For odd `n`, `magnitudes` covers bins `0..=(n-1)/2`; for even `n`, bins
/// `0..n/2`. Even-length designs place the symmetry point between taps
/// `n/2 - 1` and `n/2`.
pub fn fir_fsamp(
    n: usize,
    magnitudes: &[f32],
    format: ImpulseFormat,
    scale: f64,
    window: Window,
) -> Vec<f32> {
    let amp = |k: usize| magnitudes.get(k).copied().unwrap_or(0.0) as f64;
    let mut taps = vec![0.0_f64; n];
    let inv_n = 1.0 / n as f64;

    let (half, center, bins) = if n % 2 == 1 {
        let m = (n - 1) / 2;
        (m + 1, m as f64, m + 1)
    } else {
        (n / 2, (n as f64 - 1.0) / 2.0, n / 2)
    };

    for (idx, tap) in taps.iter_mut().enumerate().take(half) {
        let offset = idx as f64 - center;
        let sum: f64 = (1..bins)
            .map(|k| 2.0 * amp(k) * (TWO_PI * offset * k as f64 * inv_n).cos())
            .sum();
        *tap = inv_n * (amp(0) + sum);
    }
    for idx in half..n {
        taps[idx] = taps[n - 1 - idx];
    }

    apply_window(&taps, window, format, scale)
}

/// Windowed-sinc bandpass design.
///
/// Band edges `f_low`/`f_high` are in the same unit as `sample_rate`; a
/// negative `f_low` with a complex output designs an asymmetric complex band.
/// Only half the taps are evaluated; the other half is mirrored. The center tap
/// of odd-length designs uses the closed-form limit `2 * ft`.
pub fn fir_bandpass(
    n: usize,
    f_low: f64,
    f_high: f64,
    sample_rate: f64,
    window: Window,
    format: ImpulseFormat,
    scale: f64,
) -> Vec<f32> {
    let ft = (f_high - f_low) / (2.0 * sample_rate);
    let ft_rad = TWO_PI * ft;
    let w_osc = PI * (f_high + f_low) / sample_rate;
    let m = 0.5 * (n as f64 - 1.0);
    let delta = PI / m;

    let mut impulse = match format {
        ImpulseFormat::Real => vec![0.0_f32; n],
        ImpulseFormat::Complex => vec![0.0_f32; 2 * n],
    };

    if n % 2 == 1 {
        let center = (scale * 2.0 * ft) as f32;
        match format {
            ImpulseFormat::Real => impulse[n / 2] = center,
            ImpulseFormat::Complex => {
                impulse[n - 1] = center;
                impulse[n] = 0.0;
            }
        }
    }

    let mut j = (n / 2) as isize - 1;
    for i in (n + 1) / 2..n {
        let posi = i as f64 - m;
        let posj = j as f64 - m;
        let sinc = (ft_rad * posi).sin() / (PI * posi);
        let win = window.eval((delta * i as f64).cos());
        let coef = scale * sinc * win;
        let ju = j as usize;
        match format {
            ImpulseFormat::Real => {
                impulse[i] = (coef * (posi * w_osc).cos()) as f32;
                impulse[ju] = (coef * (posj * w_osc).cos()) as f32;
            }
            ImpulseFormat::Complex => {
                impulse[2 * i] = (coef * (posi * w_osc).cos()) as f32;
                impulse[2 * i + 1] = (-coef * (posi * w_osc).sin()) as f32;
                impulse[2 * ju] = (coef * (posj * w_osc).cos()) as f32;
                impulse[2 * ju + 1] = (-coef * (posj * w_osc).sin()) as f32;
            }
        }
        j -= 1;
    }

    impulse
}

/// Convert a complex impulse of `nm/2 + 1` taps into `nm` frequency-domain
/// multipliers for overlap-save convolution with FFT size `nm`.
///
/// The taps are stored right-justified: tap 0 lands at bin index `nm/2 - 1` and
/// the last tap at `nm - 1`, everything before is zero.
pub fn fftcv_mults(nm: usize, impulse: &[f32]) -> Vec<Complex<f32>> {
    let mut buffer = vec![Complex::new(0.0_f32, 0.0); nm];
    if nm < 2 {
        return buffer;
    }
    let start = nm / 2 - 1;
    for (slot, tap) in buffer[start..].iter_mut().zip(impulse.chunks_exact(2)) {
        *slot = Complex::new(tap[0], tap[1]);
    }
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(nm).process(&mut buffer);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn response(taps: &[f32], freq: f64, rate: f64) -> f64 {
        let (mut re, mut im) = (0.0, 0.0);
        for (n, &t) in taps.iter().enumerate() {
            let arg = TWO_PI * freq * n as f64 / rate;
            re += t as f64 * arg.cos();
            im -= t as f64 * arg.sin();
        }
        (re * re + im * im).sqrt()
    }

    #[test]
    fn test_window_fallback() {
        assert_eq!(Window::from_index(0), Window::BlackmanHarris4);
        assert_eq!(Window::from_index(1), Window::BlackmanHarris7);
        assert_eq!(Window::from_index(9), Window::Rectangular);
        assert_eq!(Window::from_index(-1), Window::Rectangular);
    }

    #[test]
    fn test_window_shape() {
        for window in [Window::BlackmanHarris4, Window::BlackmanHarris7] {
            let w = window.samples(65);
            // Peak at the center, near zero at the edges
            assert_abs_diff_eq!(w[32], 1.0, epsilon = 1e-3);
            assert!(w[0] < 1e-3);
            assert_abs_diff_eq!(w[10], w[54], epsilon = 1e-12);
        }
        assert!(Window::Rectangular.samples(8).iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_bandpass_symmetric_and_centered() {
        let taps = fir_bandpass(63, -3000.0, 3000.0, 48000.0, Window::BlackmanHarris4, ImpulseFormat::Real, 1.0);
        assert_eq!(taps.len(), 63);
        for i in 0..31 {
            assert_abs_diff_eq!(taps[i], taps[62 - i], epsilon = 1e-6);
        }
        // Center tap is the closed-form limit 2 * ft
        assert_abs_diff_eq!(taps[31], 2.0 * 6000.0 / 96000.0, epsilon = 1e-6);
        assert!(taps.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn test_bandpass_even_length() {
        let taps = fir_bandpass(64, 500.0, 1500.0, 8000.0, Window::BlackmanHarris7, ImpulseFormat::Real, 1.0);
        for i in 0..32 {
            assert_abs_diff_eq!(taps[i], taps[63 - i], epsilon = 1e-6);
        }
        assert!(taps.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn test_lowpass_unity_dc_gain() {
        let taps = fir_bandpass(255, -0.1, 0.1, 1.0, Window::BlackmanHarris7, ImpulseFormat::Real, 1.0);
        let dc: f32 = taps.iter().sum();
        assert_abs_diff_eq!(dc, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_real_bandpass_response() {
        let rate = 48000.0;
        let taps = fir_bandpass(1023, 1000.0, 2000.0, rate, Window::BlackmanHarris7, ImpulseFormat::Real, 1.0);
        // A real bandpass splits energy between positive and negative images
        assert!(response(&taps, 1500.0, rate) > 0.4);
        assert!(response(&taps, 8000.0, rate) < 1e-3);
    }

    #[test]
    fn test_complex_bandpass_one_sided() {
        let n = 129;
        let taps = fir_bandpass(n, 300.0, 3000.0, 48000.0, Window::BlackmanHarris4, ImpulseFormat::Complex, 1.0);
        assert_eq!(taps.len(), 2 * n);
        // Center tap of an odd complex design sits at float index n - 1
        assert_abs_diff_eq!(taps[n - 1], 2.0 * 2700.0 / 96000.0, epsilon = 1e-6);
        assert_eq!(taps[n], 0.0);
        // Conjugate-symmetric about the center
        let c = n / 2;
        for k in 1..c {
            assert_abs_diff_eq!(taps[2 * (c + k)], taps[2 * (c - k)], epsilon = 1e-6);
            assert_abs_diff_eq!(taps[2 * (c + k) + 1], -taps[2 * (c - k) + 1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_fsamp_allpass_is_impulse() {
        // Flat magnitude with a rectangular window reproduces a delayed impulse
        let n = 31;
        let flat = vec![1.0_f32; 16];
        let taps = fir_fsamp(n, &flat, ImpulseFormat::Real, 1.0, Window::Rectangular);
        for (i, &t) in taps.iter().enumerate() {
            let expected = if i == 15 { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(t, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_fsamp_odd_matches_direct_sum() {
        let n = 33;
        let mags: Vec<f32> = (0..17).map(|k| if k < 5 { 1.0 } else { 0.0 }).collect();
        let direct = fir_fsamp(n, &mags, ImpulseFormat::Real, 2.0, Window::BlackmanHarris4);
        let via_fft = fir_fsamp_odd(n, &mags, ImpulseFormat::Real, 2.0, Window::BlackmanHarris4);
        for (a, b) in direct.iter().zip(&via_fft) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_fsamp_even_symmetry_and_complex_layout() {
        let n = 32;
        let mags: Vec<f32> = (0..16).map(|k| if k < 4 { 1.0 } else { 0.0 }).collect();
        let taps = fir_fsamp(n, &mags, ImpulseFormat::Complex, 1.0, Window::BlackmanHarris7);
        assert_eq!(taps.len(), 2 * n);
        for i in 0..n / 2 {
            assert_abs_diff_eq!(taps[2 * i], taps[2 * (n - 1 - i)], epsilon = 1e-6);
            assert_eq!(taps[2 * i + 1], 0.0);
        }
    }

    #[test]
    fn test_degenerate_lengths() {
        let mags = [1.0_f32; 4];
        assert!(fir_fsamp_odd(0, &mags, ImpulseFormat::Real, 1.0, Window::BlackmanHarris7).is_empty());
        assert!(fir_fsamp(0, &mags, ImpulseFormat::Complex, 1.0, Window::BlackmanHarris7).is_empty());
        assert!(fir_bandpass(0, -0.1, 0.1, 1.0, Window::BlackmanHarris7, ImpulseFormat::Real, 1.0).is_empty());
        assert!(fftcv_mults(0, &[]).is_empty());
        assert!(Window::BlackmanHarris4.samples(0).is_empty());

        // A single tap is the DC magnitude, unwindowed
        let odd = fir_fsamp_odd(1, &mags, ImpulseFormat::Real, 0.5, Window::BlackmanHarris7);
        let direct = fir_fsamp(1, &mags, ImpulseFormat::Real, 0.5, Window::BlackmanHarris7);
        assert_eq!(odd.len(), 1);
        assert_abs_diff_eq!(odd[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(direct[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_fftcv_mults_right_justified() {
        // A single unit tap at position 0 lands at bin nm/2 - 1
        let nm = 16;
        let mut impulse = vec![0.0_f32; 2 * (nm / 2 + 1)];
        impulse[0] = 1.0;
        let mults = fftcv_mults(nm, &impulse);
        assert_eq!(mults.len(), nm);
        let shift = (nm / 2 - 1) as f64;
        for (k, m) in mults.iter().enumerate() {
            let phase = -TWO_PI * k as f64 * shift / nm as f64;
            assert_abs_diff_eq!(m.re as f64, phase.cos(), epsilon = 1e-5);
            assert_abs_diff_eq!(m.im as f64, phase.sin(), epsilon = 1e-5);
        }
    }
}
