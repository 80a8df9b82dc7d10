//! CLI Module
//!
//! Command-line interface for the eqstream player and its controller.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default address of a running player's control channel
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:5555";

/// eqstream - real-time graphic equalizer with live gain control
#[derive(Parser, Debug)]
#[command(name = "eqstream")]
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
    /// Play a file through the equalizer and record the result
    #[command(name = "play")]
    Play {
        /// Input audio file (mp3 or wav)
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not open the playback device
        #[arg(long)]
        no_playback: bool,

        /// Control channel address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Frames per processing block
        #[arg(long)]
        block_frames: Option<usize>,

        /// Disable the spectrum analyzer
        #[arg(long)]
        no_analyzer: bool,
    },

    /// Set one band's gain on a running player
    #[command(name = "set-gain")]
    SetGain {
        /// Band index
        #[arg(short, long)]
        band: usize,

        /// Gain in dB
        #[arg(short, long, allow_hyphen_values = true)]
        gain_db: f64,

        /// Player control address
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },

    /// Set several bands at once, e.g. `set-all 0=-6 2=3.5`
    #[command(name = "set-all")]
    SetAll {
        /// BAND=DB pairs
        #[arg(required = true, value_parser = commands::parse_band_assignment)]
        assignments: Vec<(usize, f64)>,

        /// Player control address
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
    },

    /// Print the configured band layout
    #[command(name = "bands")]
    Bands {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
