//! I/Q recording file I/O
//!
//! Baseband recordings are stored as WAV files with I on the left channel
//! and Q on the right. Mono files are read as a real signal with Q = 0.
//! Integer files are scaled to [-1, 1); output is always 32-bit float.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{Result, StageError};

/// A decoded recording with interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct IqRecording {
    pub sample_rate: u32,
    /// 2 for I/Q, 1 for scalar
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl IqRecording {
    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file as interleaved I/Q
///
/// # Errors
/// * `Wav` - If the file cannot be opened or decoded
/// * `UnsupportedFormat` - If it has more than two channels or an odd bit depth
pub fn read_iq_wav(path: &Path) -> Result<IqRecording> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    log::debug!(
        "reading {}: {} ch, {} Hz, {}-bit {:?}",
        path.display(),
        spec.channels,
        spec.sample_rate,
        spec.bits_per_sample,
        spec.sample_format
    );

    if spec.channels == 0 || spec.channels > 2 {
        return Err(StageError::UnsupportedFormat {
            format: format!("{}-channel audio (expected stereo I/Q)", spec.channels),
        });
    }

    let raw = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let samples = if spec.channels == 1 {
        raw.iter().flat_map(|&i| [i, 0.0]).collect()
    } else {
        raw
    };

    Ok(IqRecording {
        sample_rate: spec.sample_rate,
        channels: 2,
        samples,
    })
}

/// Write interleaved samples as a 32-bit float WAV file
pub fn write_wav(path: &Path, samples: &[f32], channels: u16, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    log::debug!(
        "wrote {} frames to {}",
        samples.len() / channels.max(1) as usize,
        path.display()
    );
    Ok(())
}

/// Generate a complex tone `exp(j·2π·f·n/rate)` as interleaved I/Q
pub fn generate_iq_tone(frequency: f64, frames: usize, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let w = std::f64::consts::TAU * frequency / sample_rate as f64;
    (0..frames)
        .flat_map(|n| {
            let phase = w * n as f64;
            [amplitude * phase.cos() as f32, amplitude * phase.sin() as f32]
        })
        .collect()
}

fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let samples = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        // 24-bit is stored as i32 in hound
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits) => {
            return Err(StageError::UnsupportedFormat {
                format: format!("{}-bit integer audio", bits),
            })
        }
    };
    Ok(samples)
}
