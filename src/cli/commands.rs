//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::config::Config;
use crate::control::{send_message, ControlMessage, GainControl, GainControlServer};
use crate::engine::{
    playback, FrameSource, PlaybackStage, SessionSummary, StreamPipeline, SymphoniaSource,
};
use crate::error::Result;

/// Meter glyphs from quietest to loudest
const METER_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
/// Levels at or below this read as empty
const METER_FLOOR_DB: f64 = -60.0;

/// Options for `play`, after argument parsing
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub no_playback: bool,
    pub bind: Option<String>,
    pub block_frames: Option<usize>,
    pub no_analyzer: bool,
}

/// Load the config file if given, otherwise the defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration: {}", path.display());
            Config::load(path)
        }
        None => Ok(Config::default()),
    }
}

/// Apply command-line overrides on top of the loaded config
pub fn apply_overrides(config: &mut Config, options: &PlayOptions) {
    if let Some(output) = &options.output {
        config.pipeline.output_path = output.clone();
    }
    if let Some(bind) = &options.bind {
        config.control.bind = bind.clone();
    }
    if let Some(frames) = options.block_frames {
        config.pipeline.block_frames = frames;
    }
    if options.no_playback {
        config.pipeline.playback = false;
    }
    if options.no_analyzer {
        config.analyzer.enabled = false;
    }
}

/// Stream a file through the equalizer with the control channel listening
pub fn play(options: &PlayOptions) -> Result<SessionSummary> {
    let mut config = load_config(options.config.as_deref())?;
    apply_overrides(&mut config, options);

    let mut source = SymphoniaSource::open(&options.input)?;
    // Band cutoffs are designed for the rate actually being decoded
    config.equalizer.sample_rate = source.sample_rate();
    config.validate()?;

    let playback = if config.pipeline.playback {
        PlaybackStage::from_open_result(playback::open_default(
            config.equalizer.sample_rate,
            config.pipeline.channels as u16,
        ))
    } else {
        info!("Playback disabled, writing file only");
        PlaybackStage::silent()
    };

    let mut pipeline = StreamPipeline::from_config(&config, playback)?;
    if let Some(analyzer) = pipeline.analyzer_mut() {
        analyzer.set_listener(Box::new(|levels: &[f64]| {
            debug!("Spectrum |{}|", render_meter(levels));
        }));
    }

    let gains: Arc<dyn GainControl> = pipeline.gains();
    let control = GainControlServer::bind(config.control.bind.as_str(), gains)?.spawn()?;
    println!("Control channel on {}", control.local_addr());

    let result = pipeline.run(&mut source);
    control.shutdown();

    if source.skipped_packets() > 0 {
        info!("Skipped {} undecodable packet(s)", source.skipped_packets());
    }

    let summary = result?;
    println!("Wrote {}", summary);
    Ok(summary)
}

/// Send a single-band update to a running player
pub fn set_gain(addr: &str, band: usize, gain_db: f64) -> Result<()> {
    let message = ControlMessage::SetOneBand { band, gain_db };
    send_message(addr, &message)?;
    println!("Band {} -> {:.1} dB sent to {}", band, gain_db, addr);
    Ok(())
}

/// Send a multi-band update to a running player
pub fn set_all(addr: &str, assignments: &[(usize, f64)]) -> Result<()> {
    let message = ControlMessage::SetAllBands(assignments.iter().copied().collect());
    send_message(addr, &message)?;
    println!("{} band(s) sent to {}", message.band_count(), addr);
    Ok(())
}

/// Print the band layout
pub fn show_bands(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let eq = &config.equalizer;
    println!(
        "{} bands at {} Hz, {} taps each, gains within +/-{} dB",
        eq.bands.len(),
        eq.sample_rate,
        2 * eq.half_width + 1,
        eq.gain_range_db
    );
    println!("{:-<44}", "");
    for (i, band) in eq.bands.iter().enumerate() {
        println!(
            "{:>3}  {:<10} {:>9.1} - {:>9.1} Hz",
            i, band.label, band.low_hz, band.high_hz
        );
    }
    Ok(())
}

/// Parse a `BAND=DB` pair
pub fn parse_band_assignment(s: &str) -> std::result::Result<(usize, f64), String> {
    let (band, gain) = s
        .split_once('=')
        .ok_or_else(|| format!("expected BAND=DB, got {:?}", s))?;
    let band = band
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad band index {:?}: {}", band, e))?;
    let gain = gain
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad gain {:?}: {}", gain, e))?;
    if !gain.is_finite() {
        return Err(format!("gain must be finite, got {}", gain));
    }
    Ok((band, gain))
}

/// One glyph per band, scaled from the floor up to 0 dB
pub fn render_meter(levels: &[f64]) -> String {
    let steps = (METER_GLYPHS.len() - 1) as f64;
    levels
        .iter()
        .map(|&db| {
            let fraction = ((db - METER_FLOOR_DB) / -METER_FLOOR_DB).clamp(0.0, 1.0);
            METER_GLYPHS[(fraction * steps).round() as usize]
        })
        .collect()
}
