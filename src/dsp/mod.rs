//! DSP Library
//!
//! Band-pass FIR design and streaming convolution, the multi-band
//! equalizer built on it, the block limiter, and the spectrum analyzer
//! that watches the processed stream.

pub mod equalizer;
pub mod fir;
pub mod limiter;
pub mod spectrum;

pub use equalizer::{db_to_linear, BandGains, EqualizerEngine};
pub use fir::{design_band_pass, BandFilter, FilterSpec};
pub use limiter::BlockLimiter;
pub use spectrum::{SpectrumAnalyzer, SpectrumListener};
