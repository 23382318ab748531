//! Cascaded Biquad Peaking Filter
//!
//! A cascade of identical second-order bandpass sections with a front gain
//! stage. Two coefficient derivations are available, see [`PeakDesign`].

use crate::dsp::biquad::{clamp_center, Biquad, BiquadHistory};
use crate::dsp::stage::{clamp_rate, expect_bool, expect_f64, expect_usize, lock, Stage};
use crate::engine::{BlockIo, BufferPool, StageBuffers};
use crate::error::{Result, StageError};
use crate::impl_stage_common;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f64::consts::TAU;
use std::sync::Mutex;

// ============================================================================
// Design constants
// ============================================================================
//
// Empirically fitted; kept exactly so the response matches existing radios.

/// Direct design, 4 stages: bandwidth scale
const DIRECT_BW_PARM_4: f64 = 2.4;
/// Direct design, 4 stages: center frequency correction `1 + F1*r + F2*r^2`
const DIRECT_F_CORR_4: [f64; 2] = [-0.160, 1.440];
/// Direct design, 4 stages: gain correction `1 + G1*r + G2*r^2`
const DIRECT_G_CORR_4: [f64; 2] = [-1.003, 3.990];

/// Direct design: pole radius bounds, keeping every section stable
const DIRECT_MIN_QR: f64 = 0.01;
const DIRECT_MAX_QR: f64 = 0.999_999;

/// Matched design, 4 stages: bandwidth scale
const MATCHED_BW_PARM_4: f64 = 5.0;
/// Matched design, 4 stages: bandwidth correction `B1*r + B2*r^2`
const MATCHED_BW_CORR_4: [f64; 2] = [1.13, -0.956];
/// Matched design: per-section amplitude (center gain A^2)
const MATCHED_A: f64 = 2.5;
/// Matched design: center frequency floor in Hz
const MATCHED_F_FLOOR: f64 = 200.0;

/// Largest half-bandwidth of the matched design as a fraction of the center
const MATCHED_MAX_HALF_WIDTH: f64 = 0.95;

/// Coefficient derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakDesign {
    /// Constant-bandwidth resonator; bandwidth in Hz
    #[default]
    Direct,
    /// Bilinear "analog-matched" peaking section with gain compensation
    Matched,
}

impl PeakDesign {
    /// Map a numeric design index (0 = direct, 1 = matched)
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PeakDesign::Direct),
            1 => Some(PeakDesign::Matched),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            PeakDesign::Direct => 0,
            PeakDesign::Matched => 1,
        }
    }
}

/// Coefficients, front gain and cascade history of one peaking filter.
///
/// Holds no lock; [`PeakFilter`] and the multi-peak bank wrap it in theirs.
#[derive(Debug, Clone)]
pub struct PeakCore {
    rate: f64,
    freq: f64,
    bandwidth: f64,
    gain: f64,
    nstages: usize,
    design: PeakDesign,
    fgain: f64,
    coefs: Biquad,
    /// One I/Q history pair per cascade section
    hist: Vec<[BiquadHistory; 2]>,
}

impl PeakCore {
    pub fn new(
        rate: f64,
        freq: f64,
        bandwidth: f64,
        gain: f64,
        nstages: usize,
        design: PeakDesign,
    ) -> Self {
        let nstages = nstages.max(1);
        let mut core = Self {
            rate: clamp_rate("peak", rate),
            freq,
            bandwidth,
            gain,
            nstages,
            design,
            fgain: gain,
            coefs: Biquad::default(),
            hist: vec![[BiquadHistory::default(); 2]; nstages],
        };
        core.calc();
        core
    }

    /// Recompute `fgain` and the section coefficients
    fn calc(&mut self) {
        match self.design {
            PeakDesign::Direct => self.calc_direct(),
            PeakDesign::Matched => self.calc_matched(),
        }
        log::debug!(
            "peak: design={:?} f={} bw={} gain={} stages={} fgain={:.6}",
            self.design,
            self.freq,
            self.bandwidth,
            self.gain,
            self.nstages,
            self.fgain
        );
    }

    fn calc_direct(&mut self) {
        let freq = clamp_center("peak", self.freq, self.rate);
        let bandwidth = if self.bandwidth.is_finite() {
            self.bandwidth
        } else {
            log::warn!("peak: bandwidth {} Hz is invalid, using 0 Hz", self.bandwidth);
            0.0
        };
        let ratio = bandwidth / freq;
        let (bw_parm, f_corr, g_corr) = if self.nstages == 4 {
            (
                DIRECT_BW_PARM_4,
                1.0 + DIRECT_F_CORR_4[0] * ratio + DIRECT_F_CORR_4[1] * ratio * ratio,
                1.0 + DIRECT_G_CORR_4[0] * ratio + DIRECT_G_CORR_4[1] * ratio * ratio,
            )
        } else {
            (1.0, 1.0, 1.0)
        };

        self.fgain = self.gain / g_corr;
        let fn_norm = freq / self.rate / f_corr;
        let mut qr = 1.0 - 3.0 * bandwidth / self.rate * bw_parm;
        if !(qr > DIRECT_MIN_QR && qr < DIRECT_MAX_QR) {
            let clamped = if qr.is_nan() || qr >= DIRECT_MAX_QR {
                DIRECT_MAX_QR
            } else {
                DIRECT_MIN_QR
            };
            log::warn!("peak: bandwidth {} Hz gives pole radius {}, using {}", bandwidth, qr, clamped);
            qr = clamped;
        }
        self.coefs = Biquad::peak(fn_norm, qr);
    }

    fn calc_matched(&mut self) {
        let mut freq = clamp_center("peak", self.freq, self.rate);
        if freq < MATCHED_F_FLOOR {
            log::warn!("peak: center {} Hz below floor, using {} Hz", freq, MATCHED_F_FLOOR);
            freq = MATCHED_F_FLOOR;
        }
        let ratio = self.bandwidth / freq;
        let (bw_parm, bw_corr) = if self.nstages == 4 {
            (
                MATCHED_BW_PARM_4,
                MATCHED_BW_CORR_4[0] * ratio + MATCHED_BW_CORR_4[1] * ratio * ratio,
            )
        } else {
            (1.0, 1.0)
        };
        let a = MATCHED_A;

        let w0 = TAU * freq / self.rate;
        let sn = w0.sin();
        let cbw = bw_corr * freq;
        let mut half = 0.5 * cbw * bw_parm;
        let max_half = MATCHED_MAX_HALF_WIDTH * freq;
        if !(half > 0.0 && half <= max_half) {
            let clamped = if half > 0.0 { max_half } else { 1e-3 * freq };
            log::warn!("peak: degenerate bandwidth {} Hz, using {} Hz", 2.0 * half, 2.0 * clamped);
            half = clamped;
        }

        let c = sn * (0.5 * ((freq + half) / (freq - half)).ln() * w0 / sn).sinh();
        let den = 1.0 + c / a;
        let a1 = -2.0 * w0.cos() / den;
        self.coefs = Biquad {
            a0: (1.0 + c * a) / den,
            a1,
            a2: (1.0 - c * a) / den,
            b1: -a1,
            b2: -(1.0 - c / a) / den,
        };
        self.fgain = self.gain / (a * a).powi(self.nstages as i32);
    }

    /// Filter one complex sample through the front gain and every section
    #[inline]
    pub fn tick(&mut self, i: f32, q: f32) -> (f32, f32) {
        let coefs = self.coefs;
        let mut xi = self.fgain * i as f64;
        let mut xq = self.fgain * q as f64;
        for [hi, hq] in self.hist.iter_mut() {
            xi = hi.tick(&coefs, xi);
            xq = hq.tick(&coefs, xq);
        }
        (xi as f32, xq as f32)
    }

    /// Zero the cascade history
    pub fn flush(&mut self) {
        for pair in &mut self.hist {
            pair.iter_mut().for_each(BiquadHistory::reset);
        }
    }

    pub fn set_freq(&mut self, freq: f64) {
        self.freq = freq;
        self.calc();
    }

    pub fn set_bandwidth(&mut self, bandwidth: f64) {
        self.bandwidth = bandwidth;
        self.calc();
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
        self.calc();
    }

    pub fn set_design(&mut self, design: PeakDesign) {
        self.design = design;
        self.calc();
    }

    /// Change the cascade depth; reallocates and zeroes the history
    pub fn set_stages(&mut self, nstages: usize) {
        self.nstages = nstages.max(1);
        self.hist = vec![[BiquadHistory::default(); 2]; self.nstages];
        self.calc();
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn stages(&self) -> usize {
        self.nstages
    }

    pub fn design(&self) -> PeakDesign {
        self.design
    }

    /// Steady-state magnitude response at `freq` Hz, front gain included
    pub fn magnitude(&self, freq: f64) -> f64 {
        self.fgain.abs() * self.coefs.magnitude(freq / self.rate).powi(self.nstages as i32)
    }

    fn params(&self) -> Value {
        json!({
            "freq": self.freq,
            "bandwidth": self.bandwidth,
            "gain": self.gain,
            "stages": self.nstages,
            "design": self.design,
        })
    }
}

#[derive(Debug)]
struct PeakState {
    run: bool,
    buffers: StageBuffers,
    core: PeakCore,
}

impl PeakState {
    fn process(&mut self, io: BlockIo<'_>, size: usize) {
        let core = &mut self.core;
        io.map_iq(size, |i, q| core.tick(i, q));
    }
}

/// Cascaded peaking filter stage
///
/// # Parameters
/// - `freq`: center frequency in Hz
/// - `bandwidth`: bandwidth in Hz
/// - `gain`: linear gain at the center frequency
/// - `stages`: number of cascaded sections (4 enables the fitted corrections)
/// - `design`: `direct` or `matched`
#[derive(Debug)]
pub struct PeakFilter {
    state: Mutex<PeakState>,
}

impl PeakFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        buffers: StageBuffers,
        rate: f64,
        freq: f64,
        bandwidth: f64,
        gain: f64,
        nstages: usize,
        design: PeakDesign,
    ) -> Self {
        Self {
            state: Mutex::new(PeakState {
                run: enabled,
                buffers,
                core: PeakCore::new(rate, freq, bandwidth, gain, nstages, design),
            }),
        }
    }

    pub fn set_freq(&self, freq: f64) {
        lock(&self.state).core.set_freq(freq);
    }

    pub fn set_bandwidth(&self, bandwidth: f64) {
        lock(&self.state).core.set_bandwidth(bandwidth);
    }

    pub fn set_gain(&self, gain: f64) {
        lock(&self.state).core.set_gain(gain);
    }

    pub fn set_design(&self, design: PeakDesign) {
        lock(&self.state).core.set_design(design);
    }

    pub fn set_stages(&self, nstages: usize) {
        lock(&self.state).core.set_stages(nstages);
    }

    /// Steady-state magnitude response at `freq` Hz
    pub fn magnitude(&self, freq: f64) -> f64 {
        lock(&self.state).core.magnitude(freq)
    }
}

impl Stage for PeakFilter {
    impl_stage_common!("peak");

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
        lock(&self.state).core.flush();
    }

    fn get_params(&self) -> Value {
        let st = lock(&self.state);
        let mut params = st.core.params();
        params["enabled"] = json!(st.run);
        params["size"] = json!(st.buffers.size);
        params["rate"] = json!(st.core.rate);
        params
    }

    fn set_param(&self, name: &str, value: &Value) -> Result<()> {
        match name {
            "freq" => self.set_freq(expect_f64(name, value)?),
            "bandwidth" => self.set_bandwidth(expect_f64(name, value)?),
            "gain" => self.set_gain(expect_f64(name, value)?),
            "stages" => self.set_stages(expect_usize(name, value)?),
            "design" => self.set_design(parse_design(value)?),
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

/// Accept a design by name (`"direct"`, `"matched"`) or index (0, 1)
pub(crate) fn parse_design(value: &Value) -> Result<PeakDesign> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|i| PeakDesign::from_index(i as usize)),
        Value::String(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| StageError::InvalidParameter {
        param: "design".to_string(),
        value: value.to_string(),
        expected: "\"direct\", \"matched\", 0 or 1".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 48000.0;

    fn tone(n: usize, freq: f64) -> Vec<f32> {
        (0..n)
            .flat_map(|t| {
                let arg = TAU * freq * t as f64 / RATE;
                [arg.cos() as f32, arg.sin() as f32]
            })
            .collect()
    }

    /// Mean magnitude over the last quarter of the response to a unit tone
    fn settled_gain(filter: &PeakFilter, freq: f64) -> f64 {
        let n = 16384;
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(n);
        filter.set_buffers(StageBuffers::in_place(n, buf));
        filter.flush();
        pool.write(buf, &tone(n, freq));
        filter.execute(&mut pool);
        let tail = &pool.get(buf).unwrap()[2 * (3 * n / 4)..];
        let sum: f64 = tail
            .chunks_exact(2)
            .map(|p| (p[0] as f64).hypot(p[1] as f64))
            .sum();
        sum / (tail.len() / 2) as f64
    }

    fn filter(gain: f64, nstages: usize, design: PeakDesign) -> PeakFilter {
        let mut pool = BufferPool::new();
        let buf = pool.allocate_complex(1);
        PeakFilter::new(true, StageBuffers::in_place(1, buf), RATE, 600.0, 100.0, gain, nstages, design)
    }

    #[test]
    fn test_direct_single_stage_center_gain() {
        let f = filter(2.0, 1, PeakDesign::Direct);
        assert!((f.magnitude(600.0) - 2.0).abs() < 1e-6);
        assert!((settled_gain(&f, 600.0) - 2.0).abs() < 1e-3);
        assert!(settled_gain(&f, 6000.0) < 0.1);
    }

    #[test]
    fn test_matched_center_gain_and_rejection() {
        for nstages in [1, 2, 4] {
            let f = filter(1.0, nstages, PeakDesign::Matched);
            let center = settled_gain(&f, 600.0);
            assert!((center - 1.0).abs() < 0.01, "stages {}: center {}", nstages, center);
            let far = settled_gain(&f, 12000.0);
            assert!(far < 0.2, "stages {}: far {}", nstages, far);
        }
    }

    #[test]
    fn test_direct_four_stage_corrections_applied() {
        let f = filter(1.0, 4, PeakDesign::Direct);
        let st = lock(&f.state);
        let ratio: f64 = 100.0 / 600.0;
        let g_corr = 1.0 - 1.003 * ratio + 3.990 * ratio * ratio;
        assert!((st.core.fgain - 1.0 / g_corr).abs() < 1e-12);
    }

    #[test]
    fn test_direct_pole_radius_stays_inside_unit_circle() {
        let cases = [
            (1, 0.0),
            (1, -50.0),
            (1, 1e6),
            (1, f64::NAN),
            (1, f64::INFINITY),
            (4, 0.0),
            (4, -50.0),
            (4, f64::NAN),
            (4, f64::INFINITY),
        ];
        for (nstages, bandwidth) in cases {
            let f = filter(1.0, nstages, PeakDesign::Direct);
            f.set_bandwidth(bandwidth);
            {
                let st = lock(&f.state);
                let c = st.core.coefs;
                assert!([c.a0, c.a1, c.a2, c.b1, c.b2].iter().all(|x| x.is_finite()));
                assert!(c.b2 < 0.0 && c.b2 > -1.0, "bw {}: b2 = {}", bandwidth, c.b2);
                assert!(st.core.fgain.is_finite());
            }
            let gain = settled_gain(&f, 600.0);
            assert!(gain.is_finite(), "bw {} x{}: gain {}", bandwidth, nstages, gain);
        }
    }

    #[test]
    fn test_matched_floor_keeps_requested_freq() {
        let f = filter(1.0, 1, PeakDesign::Matched);
        f.set_freq(50.0);
        assert_eq!(f.get_params()["freq"], 50.0);
        // Designed at the 200 Hz floor
        assert!((f.magnitude(200.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_param_design() {
        let f = filter(1.0, 1, PeakDesign::Direct);
        f.set_param("design", &json!(1)).unwrap();
        assert_eq!(f.get_params()["design"], "matched");
        f.set_param("design", &json!("direct")).unwrap();
        assert_eq!(f.get_params()["design"], "direct");
        assert!(f.set_param("design", &json!(7)).is_err());
        f.set_param("stages", &json!(4)).unwrap();
        assert_eq!(f.get_params()["stages"], 4);
    }

    #[test]
    fn test_flush_matches_fresh_filter() {
        let mut pool = BufferPool::new();
        let input = pool.allocate_complex(256);
        let output = pool.allocate_complex(256);
        let bufs = StageBuffers::new(256, input, output);
        let used = PeakFilter::new(true, bufs, RATE, 800.0, 150.0, 1.5, 4, PeakDesign::Matched);
        pool.write(input, &tone(256, 900.0));
        used.execute(&mut pool);
        used.flush();
        used.execute(&mut pool);
        let after_flush = pool.get(output).unwrap().to_vec();

        let fresh = PeakFilter::new(true, bufs, RATE, 800.0, 150.0, 1.5, 4, PeakDesign::Matched);
        fresh.execute(&mut pool);
        assert_eq!(pool.get(output).unwrap(), after_flush.as_slice());
    }
}
