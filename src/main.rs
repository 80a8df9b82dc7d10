//! eqstream CLI - Real-time Graphic Equalizer
//!
//! Plays a file through the equalizer, or retunes a running player.

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use eqstream::cli::commands::{self, PlayOptions};
use eqstream::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    info!("eqstream v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("eqstream v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Play {
            input,
            output,
            config,
            no_playback,
            bind,
            block_frames,
            no_analyzer,
        } => {
            let options = PlayOptions {
                input,
                output,
                config,
                no_playback,
                bind,
                block_frames,
                no_analyzer,
            };
            commands::play(&options)
                .with_context(|| format!("playing {}", options.input.display()))?;
            Ok(())
        }
        Commands::SetGain {
            band,
            gain_db,
            addr,
        } => commands::set_gain(&addr, band, gain_db)
            .with_context(|| format!("sending gain update to {}", addr)),
        Commands::SetAll { assignments, addr } => commands::set_all(&addr, &assignments)
            .with_context(|| format!("sending gain update to {}", addr)),
        Commands::Bands { config } => {
            commands::show_bands(config.as_deref()).context("reading band layout")
        }
    }
}
