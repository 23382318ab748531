//! DSP Stage Library
//!
//! Signal processing stages for interleaved complex sample blocks.
//! All stages implement the `Stage` trait for uniform chain processing.

mod ammod;
mod bandpass;
mod biquad;
mod chain;
mod delay;
pub mod fir;
mod gain;
mod multipeak;
mod notch;
mod peak;
mod resample;
mod shift;
pub mod stage;

pub use ammod::{AmMode, AmModulator};
pub use bandpass::BandpassFilter;
pub use biquad::{Biquad, BiquadHistory};
pub use chain::{ChainControl, StageChain};
pub use delay::{Delay, WHOLE_SAMPLE_DELAYS};
pub use fir::{fftcv_mults, fir_bandpass, fir_fsamp, fir_fsamp_odd, ImpulseFormat, Window};
pub use gain::{run_flag, GainStage, RunFlag};
pub use multipeak::{MultiPeakFilterBank, PeakSpec};
pub use notch::NotchFilter;
pub use peak::{PeakCore, PeakDesign, PeakFilter};
pub use resample::{max_output_samples, RealResampler, Resampler};
pub use shift::FrequencyShifter;
pub use stage::Stage;
