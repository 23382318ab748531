//! iqchain - Baseband DSP Stage Library
//!
//! Building blocks for software-defined-radio receive and transmit chains.
//! Every stage works on caller-owned blocks of interleaved I/Q samples:
//!
//! - Fractional delay line with polyphase interpolation
//! - Biquad notch, peak and multi-peak filters
//! - Complex frequency shifter
//! - FIR design utilities and an FFT bandpass filter
//! - Polyphase rational resamplers
//! - Gain and AM modulation stages
//!
//! # Architecture
//!
//! Stages share one lifecycle: construct with buffer handles and a rate,
//! reconfigure from any thread, execute once per block, flush, drop.
//! A [`engine::Channel`] owns the buffers and the [`dsp::StageChain`];
//! [`config::ChainConfig`] assembles both from JSON.

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;

pub use config::ChainConfig;
pub use error::{Result, StageError};
