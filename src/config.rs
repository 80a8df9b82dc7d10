//! Session configuration
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! yields the stock five-band 44.1 kHz layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EqError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub equalizer: EqualizerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// One equalizer band, fixed for the lifetime of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    /// Label used in gain-update logs
    pub label: String,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl BandConfig {
    pub fn new(label: &str, low_hz: f64, high_hz: f64) -> Self {
        Self {
            label: label.to_string(),
            low_hz,
            high_hz,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqualizerConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Filter half-width K; each band uses 2K+1 taps
    #[serde(default = "default_half_width")]
    pub half_width: usize,
    /// Gains are clamped to +/- this many dB
    #[serde(default = "default_gain_range_db")]
    pub gain_range_db: f64,
    /// Block peak above which the soft limiter scales the block down
    #[serde(default = "default_limiter_threshold")]
    pub limiter_threshold: f32,
    #[serde(default = "default_bands")]
    pub bands: Vec<BandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames per processing block
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// Try to open the playback device
    #[serde(default = "default_true")]
    pub playback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_analyzer_bands")]
    pub num_bands: usize,
    #[serde(default = "default_min_hz")]
    pub min_hz: f64,
    #[serde(default = "default_max_hz")]
    pub max_hz: f64,
    /// Emit one vector every `decimation` analyzed blocks
    #[serde(default = "default_decimation")]
    pub decimation: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            half_width: default_half_width(),
            gain_range_db: default_gain_range_db(),
            limiter_threshold: default_limiter_threshold(),
            bands: default_bands(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_frames: default_block_frames(),
            channels: default_channels(),
            output_path: default_output_path(),
            playback: true,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fft_size: default_fft_size(),
            num_bands: default_analyzer_bands(),
            min_hz: default_min_hz(),
            max_hz: default_max_hz(),
            decimation: default_decimation(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_half_width() -> usize { 64 }
fn default_gain_range_db() -> f64 { 12.0 }
fn default_limiter_threshold() -> f32 { 0.95 }
fn default_block_frames() -> usize { 1024 }
fn default_channels() -> usize { 2 }
fn default_output_path() -> PathBuf { PathBuf::from("output_eq.wav") }
fn default_true() -> bool { true }
fn default_fft_size() -> usize { 1024 }
fn default_analyzer_bands() -> usize { 10 }
fn default_min_hz() -> f64 { 50.0 }
fn default_max_hz() -> f64 { 20000.0 }
fn default_decimation() -> usize { 4 }
fn default_bind() -> String { "127.0.0.1:5555".into() }

fn default_bands() -> Vec<BandConfig> {
    vec![
        BandConfig::new("100 Hz", 100.0, 215.0),
        BandConfig::new("330 Hz", 215.0, 665.0),
        BandConfig::new("1 kHz", 665.0, 2150.0),
        BandConfig::new("3.3 kHz", 2150.0, 6650.0),
        BandConfig::new("10 kHz", 6650.0, 10000.0),
    ]
}

impl Config {
    /// Load a configuration file; missing sections fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EqError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything that would fail once streaming has started
    pub fn validate(&self) -> Result<()> {
        let eq = &self.equalizer;
        if eq.sample_rate == 0 {
            return Err(EqError::invalid_config("sample_rate must be positive"));
        }
        if eq.bands.is_empty() {
            return Err(EqError::invalid_config("at least one equalizer band is required"));
        }
        if eq.half_width < 1 {
            return Err(EqError::invalid_config("half_width must be at least 1"));
        }
        if !(eq.gain_range_db > 0.0) {
            return Err(EqError::invalid_config("gain_range_db must be positive"));
        }
        if !(eq.limiter_threshold > 0.0 && eq.limiter_threshold <= 1.0) {
            return Err(EqError::invalid_config("limiter_threshold must be in (0, 1]"));
        }
        let nyquist = f64::from(eq.sample_rate) / 2.0;
        for band in &eq.bands {
            if !(band.low_hz >= 0.0 && band.low_hz < band.high_hz && band.high_hz <= nyquist) {
                return Err(EqError::InvalidFilter {
                    low_hz: band.low_hz,
                    high_hz: band.high_hz,
                    sample_rate: f64::from(eq.sample_rate),
                });
            }
        }

        let pipeline = &self.pipeline;
        if pipeline.block_frames == 0 {
            return Err(EqError::invalid_config("block_frames must be positive"));
        }
        if pipeline.channels != 2 {
            return Err(EqError::invalid_config("only interleaved stereo is supported"));
        }

        let analyzer = &self.analyzer;
        if analyzer.enabled {
            if analyzer.fft_size < 2 || !analyzer.fft_size.is_power_of_two() {
                return Err(EqError::invalid_config(format!(
                    "fft_size {} is not a power of two",
                    analyzer.fft_size
                )));
            }
            if analyzer.num_bands == 0 || analyzer.decimation == 0 {
                return Err(EqError::invalid_config(
                    "analyzer num_bands and decimation must be positive",
                ));
            }
            if !(analyzer.min_hz > 0.0 && analyzer.min_hz < analyzer.max_hz) {
                return Err(EqError::invalid_config("analyzer needs 0 < min_hz < max_hz"));
            }
        }

        Ok(())
    }

    /// Samples per block across all channels
    pub fn block_samples(&self) -> usize {
        self.pipeline.block_frames * self.pipeline.channels
    }
}
