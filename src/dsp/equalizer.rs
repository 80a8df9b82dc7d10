//! Multi-band FIR graphic equalizer
//!
//! Every band filters the same dry input; the filtered bands are mixed back
//! with an additive correction:
//!
//! ```text
//! y[n] = x[n - K] + sum_b (G_b - 1) * band_b(x)[n]
//! ```
//!
//! The band filters are linear phase with a group delay of `K = half_width`
//! samples, so the dry path is delayed by the same `K` to keep the correction
//! in phase with it. Unity gains therefore return the input delayed by
//! exactly `K` frames, sample for sample. Gains live in [`BandGains`],
//! one atomic cell per band, so a control thread can retune bands while the
//! audio thread is inside `process_in_place` without either side waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use super::fir::{BandFilter, FilterSpec};
use super::limiter::BlockLimiter;
use crate::config::EqualizerConfig;
use crate::error::{EqError, Result};

/// Bands whose linear gain is this close to 1.0 are skipped
const BYPASS_EPSILON: f64 = 1e-6;

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Per-band gain state shared between the audio and control threads
///
/// Each band stores its dB value as the bit pattern of an `f64` in an
/// `AtomicU64`; the linear gain is derived from that single word, so a
/// reader never sees a dB value paired with another update's linear gain.
#[derive(Debug)]
pub struct BandGains {
    gains_db: Vec<AtomicU64>,
    labels: Vec<String>,
    range_db: f64,
}

impl BandGains {
    /// All bands start at 0 dB
    pub fn new(labels: Vec<String>, range_db: f64) -> Self {
        let zero = 0.0_f64.to_bits();
        Self {
            gains_db: labels.iter().map(|_| AtomicU64::new(zero)).collect(),
            labels,
            range_db: range_db.abs(),
        }
    }

    pub fn num_bands(&self) -> usize {
        self.gains_db.len()
    }

    /// Gains are clamped to +/- this value
    pub fn range_db(&self) -> f64 {
        self.range_db
    }

    pub fn label(&self, band: usize) -> Option<&str> {
        self.labels.get(band).map(String::as_str)
    }

    /// Set one band's gain, clamped to the operating range
    ///
    /// Returns the stored value, or `None` when the band index is out of
    /// range or the value is not finite (the call is then a no-op).
    pub fn set_band_gain_db(&self, band: usize, gain_db: f64) -> Option<f64> {
        let cell = self.gains_db.get(band)?;
        if !gain_db.is_finite() {
            return None;
        }
        let clamped = gain_db.clamp(-self.range_db, self.range_db);
        cell.store(clamped.to_bits(), Ordering::Release);
        Some(clamped)
    }

    pub fn band_gain_db(&self, band: usize) -> Option<f64> {
        self.gains_db
            .get(band)
            .map(|cell| f64::from_bits(cell.load(Ordering::Acquire)))
    }

    pub fn band_gain_linear(&self, band: usize) -> Option<f64> {
        self.band_gain_db(band).map(db_to_linear)
    }

    /// Current gains of all bands in dB
    pub fn snapshot(&self) -> Vec<f64> {
        (0..self.num_bands())
            .filter_map(|band| self.band_gain_db(band))
            .collect()
    }
}

/// Fixed delay for one channel's dry signal
#[derive(Debug, Clone)]
struct DryDelay {
    ring: Vec<f32>,
    index: usize,
}

impl DryDelay {
    fn new(len: usize) -> Self {
        Self {
            ring: vec![0.0; len],
            index: 0,
        }
    }

    /// Store `x` and return the sample from `len` pushes ago
    #[inline]
    fn push(&mut self, x: f32) -> f32 {
        if self.ring.is_empty() {
            return x;
        }
        let out = std::mem::replace(&mut self.ring[self.index], x);
        self.index += 1;
        if self.index == self.ring.len() {
            self.index = 0;
        }
        out
    }

    fn reset(&mut self) {
        self.ring.fill(0.0);
        self.index = 0;
    }
}

/// Five-band (or N-band) FIR equalizer over interleaved audio
#[derive(Debug)]
pub struct EqualizerEngine {
    /// `filters[band][channel]`
    filters: Vec<Vec<BandFilter>>,
    gains: Arc<BandGains>,
    limiter: BlockLimiter,
    sample_rate: u32,
    channels: usize,
    latency: usize,
    /// De-interleaved copy of the input, one buffer per channel
    dry: Vec<Vec<f32>>,
    dry_delay: Vec<DryDelay>,
    scratch: Vec<f32>,
}

impl EqualizerEngine {
    /// Build all band filters; cutoffs are fixed from here on
    pub fn new(config: &EqualizerConfig, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(EqError::invalid_config("equalizer needs at least one channel"));
        }
        if config.bands.is_empty() {
            return Err(EqError::invalid_config("at least one equalizer band is required"));
        }

        let sample_rate = f64::from(config.sample_rate);
        let mut filters = Vec::with_capacity(config.bands.len());
        for band in &config.bands {
            let spec = FilterSpec::new(sample_rate, band.low_hz, band.high_hz, config.half_width);
            let filter = BandFilter::new(spec)?;
            debug!(
                "Band '{}': {:.0}-{:.0} Hz, {} taps",
                band.label,
                band.low_hz,
                band.high_hz,
                spec.num_taps()
            );
            filters.push(vec![filter; channels]);
        }

        let labels = config.bands.iter().map(|b| b.label.clone()).collect();

        Ok(Self {
            filters,
            gains: Arc::new(BandGains::new(labels, config.gain_range_db)),
            limiter: BlockLimiter::new(config.limiter_threshold),
            sample_rate: config.sample_rate,
            channels,
            latency: config.half_width,
            dry: vec![Vec::new(); channels],
            dry_delay: vec![DryDelay::new(config.half_width); channels],
            scratch: Vec::new(),
        })
    }

    /// Pre-size working buffers so blocks up to `max_samples` never allocate
    pub fn reserve(&mut self, max_samples: usize) {
        let per_channel = max_samples.div_ceil(self.channels);
        for buffer in &mut self.dry {
            buffer.reserve(per_channel.saturating_sub(buffer.len()));
        }
        self.scratch
            .reserve(per_channel.saturating_sub(self.scratch.len()));
    }

    pub fn num_bands(&self) -> usize {
        self.filters.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames between a sample entering and leaving the engine
    pub fn latency_frames(&self) -> usize {
        self.latency
    }

    /// Rate the band cutoffs were designed for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared handle to the gain cells, for the control thread
    pub fn gains(&self) -> Arc<BandGains> {
        Arc::clone(&self.gains)
    }

    /// Set a band gain; out-of-range indices are ignored
    pub fn set_band_gain_db(&self, band: usize, gain_db: f64) -> Option<f64> {
        self.gains.set_band_gain_db(band, gain_db)
    }

    pub fn band_gain_db(&self, band: usize) -> Option<f64> {
        self.gains.band_gain_db(band)
    }

    pub fn limiter(&self) -> &BlockLimiter {
        &self.limiter
    }

    /// Equalize an interleaved block in place
    ///
    /// `block` must hold exactly the valid samples; a short final block is
    /// passed as a shorter slice. Output lags input by
    /// [`latency_frames`](Self::latency_frames). When every band is at unity
    /// the delayed input is returned unaltered, limiter included.
    pub fn process_in_place(&mut self, block: &mut [f32]) {
        if block.is_empty() {
            return;
        }

        let channels = self.channels;
        for (ch, (dry, delay)) in self.dry.iter_mut().zip(&mut self.dry_delay).enumerate() {
            dry.clear();
            dry.extend(block.iter().skip(ch).step_by(channels));
            for (out, &x) in block.iter_mut().skip(ch).step_by(channels).zip(dry.iter()) {
                *out = delay.push(x);
            }
        }

        let mut any_active = false;
        for (band, filters) in self.filters.iter_mut().enumerate() {
            let gain = self.gains.band_gain_linear(band).unwrap_or(1.0);

            if (gain - 1.0).abs() < BYPASS_EPSILON {
                // Keep history current so a later boost starts seamlessly
                for (filter, dry) in filters.iter_mut().zip(&self.dry) {
                    filter.feed_history(dry);
                }
                continue;
            }

            any_active = true;
            let correction = (gain - 1.0) as f32;
            for (ch, (filter, dry)) in filters.iter_mut().zip(&self.dry).enumerate() {
                self.scratch.clear();
                self.scratch.extend_from_slice(dry);
                filter.process_block(&mut self.scratch);

                for (frame, &filtered) in self.scratch.iter().enumerate() {
                    block[frame * channels + ch] += correction * filtered;
                }
            }
        }

        if any_active {
            self.limiter.process(block);
        }
    }

    /// Clear every filter's history and the dry delay
    pub fn reset(&mut self) {
        for filter in self.filters.iter_mut().flatten() {
            filter.reset();
        }
        for delay in &mut self.dry_delay {
            delay.reset();
        }
    }
}
