//! iqchain CLI - Baseband DSP Chains
//!
//! Command-line host for the iqchain stage library.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use iqchain::cli::{commands, Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("iqchain v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("iqchain v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Process {
            config,
            input,
            output,
        } => {
            commands::process(&config, &input, &output)
                .with_context(|| format!("processing {}", input.display()))?;
        }
        Commands::Design {
            taps,
            low,
            high,
            rate,
            window,
            complex,
        } => {
            let impulse = commands::design(taps, low, high, rate, window, complex);
            println!("{}", serde_json::to_string_pretty(&impulse)?);
        }
        Commands::Inspect { config } => {
            let params = commands::inspect(&config)
                .with_context(|| format!("building chain from {}", config.display()))?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
    }
    Ok(())
}
