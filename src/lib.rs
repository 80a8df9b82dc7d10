//! eqstream - Real-time FIR Graphic Equalizer
//!
//! Decodes an audio stream, runs it through a five-band FIR equalizer block
//! by block, and writes the result to the playback device and a WAV file.
//! Band gains can be changed while audio plays through a line-oriented JSON
//! control channel, and a spectrum analyzer reports coarse band energies.
//!
//! # Architecture
//!
//! - `dsp`: filter design, band filters, the equalizer, limiter, analyzer
//! - `engine`: the block pipeline, its sources and sinks, session state
//! - `control`: the gain control channel and its client

pub mod cli;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod error;

pub use config::Config;
pub use error::{EqError, Result};
