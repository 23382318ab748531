//! CLI Command Implementations

use std::path::Path;

use log::{info, warn};
use serde_json::{json, Value};

use crate::config::ChainConfig;
use crate::dsp::{fir_bandpass, ImpulseFormat, Window};
use crate::engine::{read_iq_wav, write_wav};
use crate::error::Result;

/// Outcome of one `process` run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSummary {
    pub blocks: usize,
    pub input_frames: usize,
    pub output_frames: usize,
    pub output_rate: u32,
}

/// Run `input` through the chain in `config_path` and write `output`.
pub fn process(config_path: &Path, input: &Path, output: &Path) -> Result<ProcessSummary> {
    let config = ChainConfig::load(config_path)?;
    let mut channel = config.build()?;

    info!("Reading recording: {}", input.display());
    let recording = read_iq_wav(input)?;
    if recording.sample_rate != config.sample_rate {
        warn!(
            "recording rate {} Hz differs from chain rate {} Hz",
            recording.sample_rate, config.sample_rate
        );
    }

    // A scalar chain input takes the in-phase channel only
    let samples: Vec<f32> = if channel.input_stride() == 1 {
        recording.samples.iter().step_by(2).copied().collect()
    } else {
        recording.samples
    };

    let block_len = channel.input_stride() * channel.block_size();
    let out_stride = channel.output_stride();
    let mut produced = Vec::with_capacity(samples.len());
    let mut blocks = 0;
    for block in samples.chunks(block_len.max(1)) {
        produced.extend_from_slice(channel.process_block(block));
        blocks += 1;
    }

    let output_rate = channel.output_rate().round() as u32;
    write_wav(output, &produced, out_stride as u16, output_rate)?;

    let summary = ProcessSummary {
        blocks,
        input_frames: samples.len() / channel.input_stride(),
        output_frames: produced.len() / out_stride,
        output_rate,
    };
    info!(
        "Processed {} blocks: {} frames in, {} frames out at {} Hz",
        summary.blocks, summary.input_frames, summary.output_frames, summary.output_rate
    );
    println!("Wrote {}", output.display());
    Ok(summary)
}

/// Design a bandpass impulse and describe it as JSON.
pub fn design(taps: usize, low: f64, high: f64, rate: f64, window: i64, complex: bool) -> Value {
    let window = Window::from_index(window);
    let format = if complex {
        ImpulseFormat::Complex
    } else {
        ImpulseFormat::Real
    };
    let impulse = fir_bandpass(taps, low, high, rate, window, format, 1.0);
    json!({
        "taps": taps,
        "f_low": low,
        "f_high": high,
        "rate": rate,
        "window": window,
        "format": format,
        "impulse": impulse,
    })
}

/// Build the chain in `config_path` and return its parameters.
pub fn inspect(config_path: &Path) -> Result<Value> {
    let config = ChainConfig::load(config_path)?;
    let channel = config.build()?;
    let mut params = channel.control().params();
    params["sample_rate"] = json!(channel.sample_rate());
    params["output_rate"] = json!(channel.output_rate());
    params["block_size"] = json!(channel.block_size());
    Ok(params)
}
