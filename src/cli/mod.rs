//! CLI Module
//!
//! Command-line host for running configured chains over I/Q recordings.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// iqchain - baseband DSP chains over I/Q recordings
#[derive(Parser, Debug)]
#[command(name = "iqchain-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a recording through a configured chain
    #[command(name = "process")]
    Process {
        /// Chain configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input WAV file (left = I, right = Q)
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV file (32-bit float)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print a windowed-sinc bandpass impulse as JSON
    #[command(name = "design")]
    Design {
        /// Number of taps
        #[arg(short = 'n', long)]
        taps: usize,

        /// Lower band edge in Hz
        #[arg(long, allow_hyphen_values = true)]
        low: f64,

        /// Upper band edge in Hz
        #[arg(long, allow_hyphen_values = true)]
        high: f64,

        /// Sample rate in Hz
        #[arg(short, long, default_value_t = 48000.0)]
        rate: f64,

        /// Window index: 0 = 4-term Blackman-Harris, 1 = 7-term
        #[arg(short, long, default_value_t = 0)]
        window: i64,

        /// Emit interleaved complex taps
        #[arg(long)]
        complex: bool,
    },

    /// Build a chain and print every stage's parameters
    #[command(name = "inspect")]
    Inspect {
        /// Chain configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}
