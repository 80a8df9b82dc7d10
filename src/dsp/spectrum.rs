//! Spectrum Analyzer
//!
//! Coarse band-energy display derived from the processed stream. Each block
//! is downmixed to mono, Hann-windowed, transformed, and folded into
//! logarithmically spaced bands expressed in dB relative to the loudest band.

use std::fmt;
use std::sync::Arc;

use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AnalyzerConfig;
use crate::error::{EqError, Result};

/// Energy ratio floor, i.e. -120 dB
const MIN_RATIO: f64 = 1e-12;

/// Receives one band-energy vector per emitted update
pub type SpectrumListener = Box<dyn FnMut(&[f64]) + Send>;

/// FFT band-energy analyzer for interleaved stereo blocks
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    power: Vec<f64>,
    edges_hz: Vec<f64>,
    /// Inclusive bin range of each band
    band_bins: Vec<(usize, usize)>,
    levels_db: Vec<f64>,
    decimation: usize,
    analyzed: u64,
    listener: Option<SpectrumListener>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft_size)
            .field("edges_hz", &self.edges_hz)
            .field("decimation", &self.decimation)
            .field("analyzed", &self.analyzed)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(config: &AnalyzerConfig, sample_rate: u32) -> Result<Self> {
        let fft_size = config.fft_size;
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(EqError::invalid_config(format!(
                "fft_size {} is not a power of two",
                fft_size
            )));
        }
        if config.num_bands == 0 || config.decimation == 0 {
            return Err(EqError::invalid_config(
                "analyzer num_bands and decimation must be positive",
            ));
        }
        if !(config.min_hz > 0.0 && config.min_hz < config.max_hz) || sample_rate == 0 {
            return Err(EqError::invalid_config("analyzer needs 0 < min_hz < max_hz"));
        }

        let edges_hz = log_band_edges(config.min_hz, config.max_hz, config.num_bands);
        let band_bins = band_bin_ranges(&edges_hz, fft_size, f64::from(sample_rate));

        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        debug!(
            "Spectrum analyzer: {} bands, {}-point FFT, every {} blocks",
            config.num_bands, fft_size, config.decimation
        );

        Ok(Self {
            fft_size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            power: vec![0.0; fft_size / 2],
            edges_hz,
            band_bins,
            levels_db: vec![10.0 * MIN_RATIO.log10(); config.num_bands],
            decimation: config.decimation,
            analyzed: 0,
            listener: None,
        })
    }

    /// Install the visualization callback
    pub fn set_listener(&mut self, listener: SpectrumListener) {
        self.listener = Some(listener);
    }

    pub fn num_bands(&self) -> usize {
        self.band_bins.len()
    }

    /// Band edges in Hz, `num_bands + 1` values
    pub fn band_edges(&self) -> &[f64] {
        &self.edges_hz
    }

    /// Most recently computed band levels in dB
    pub fn levels(&self) -> &[f64] {
        &self.levels_db
    }

    /// Number of blocks analyzed so far
    pub fn analyzed_blocks(&self) -> u64 {
        self.analyzed
    }

    /// Analyze one block and forward the result on every `decimation`-th call
    ///
    /// Returns true when the listener was given a new vector. Empty blocks
    /// are ignored and do not advance the cadence.
    pub fn process_block(&mut self, interleaved: &[f32]) -> bool {
        if !self.analyze(interleaved) {
            return false;
        }

        self.analyzed += 1;
        if self.analyzed % self.decimation as u64 != 0 {
            return false;
        }

        match self.listener.as_mut() {
            Some(listener) => {
                listener(&self.levels_db);
                true
            }
            None => false,
        }
    }

    /// Recompute `levels()` from an interleaved stereo block
    fn analyze(&mut self, interleaved: &[f32]) -> bool {
        let frames = interleaved.len().div_ceil(2);
        let n = frames.min(self.fft_size);
        if n == 0 {
            return false;
        }

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = if i < n {
                let left = f64::from(interleaved[2 * i]);
                let right = interleaved.get(2 * i + 1).map_or(left, |&r| f64::from(r));
                Complex::new(0.5 * (left + right) * hann(i, n), 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (power, bin) in self.power.iter_mut().zip(&self.buffer) {
            *power = bin.norm_sqr();
        }

        let mut max_energy = 0.0_f64;
        for (level, &(lo, hi)) in self.levels_db.iter_mut().zip(&self.band_bins) {
            let bins = &self.power[lo..=hi];
            let energy = bins.iter().sum::<f64>() / bins.len() as f64;
            *level = energy;
            max_energy = max_energy.max(energy);
        }
        if max_energy <= 0.0 {
            max_energy = MIN_RATIO;
        }

        for level in &mut self.levels_db {
            let ratio = (*level / max_energy).max(MIN_RATIO);
            *level = 10.0 * ratio.log10();
        }
        true
    }
}

/// Hann window value at `i` for a window of length `n`
#[inline]
fn hann(i: usize, n: usize) -> f64 {
    if n < 2 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
}

/// Geometric band edges from `min_hz` to `max_hz`
pub fn log_band_edges(min_hz: f64, max_hz: f64, num_bands: usize) -> Vec<f64> {
    let ratio = (max_hz / min_hz).powf(1.0 / num_bands as f64);
    let mut edges: Vec<f64> = (0..=num_bands)
        .map(|i| min_hz * ratio.powi(i as i32))
        .collect();
    // Pin the last edge against accumulated rounding
    if let Some(last) = edges.last_mut() {
        *last = max_hz;
    }
    edges
}

/// Map each band to an inclusive range of positive-frequency bins
///
/// DC is never used. A band too narrow to contain a bin takes the bin
/// nearest its geometric centre.
fn band_bin_ranges(edges_hz: &[f64], fft_size: usize, sample_rate: f64) -> Vec<(usize, usize)> {
    let num_bins = fft_size / 2;
    let last_bin = num_bins.saturating_sub(1).max(1);
    let hz_to_bin = |hz: f64| hz * fft_size as f64 / sample_rate;

    edges_hz
        .windows(2)
        .map(|pair| {
            let (low, high) = (pair[0], pair[1]);
            let k_min = (hz_to_bin(low).ceil() as usize).clamp(1, last_bin);
            let k_max = (hz_to_bin(high).floor() as usize).min(last_bin);
            if k_max < k_min {
                let nearest = (hz_to_bin((low * high).sqrt()).round() as usize).clamp(1, last_bin);
                (nearest, nearest)
            } else {
                (k_min, k_max)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;
    use std::sync::Mutex;
    use test_case::test_case;

    const FS: u32 = 44100;

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(&AnalyzerConfig::default(), FS).unwrap()
    }

    fn stereo_sine(freq: f64, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (0.5 * (2.0 * PI * freq * i as f64 / f64::from(FS)).sin()) as f32;
                [v, v]
            })
            .collect()
    }

    fn loudest_band(levels: &[f64]) -> usize {
        levels
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_band_edges_are_geometric() {
        let edges = log_band_edges(50.0, 20000.0, 10);
        assert_eq!(edges.len(), 11);
        assert_eq!(edges[0], 50.0);
        assert_eq!(edges[10], 20000.0);

        let ratio = edges[1] / edges[0];
        for pair in edges.windows(2) {
            assert_relative_eq!(pair[1] / pair[0], ratio, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bin_ranges_are_valid() {
        let a = analyzer();
        for &(lo, hi) in &a.band_bins {
            assert!(lo >= 1);
            assert!(lo <= hi);
            assert!(hi < 512);
        }
        // Lowest band is narrower than one bin spacing apart
        assert_eq!(a.band_bins[0], (2, 2));
    }

    #[test]
    fn test_narrow_band_borrows_nearest_bin() {
        let ranges = band_bin_ranges(&[100.0, 110.0], 1024, 44100.0);
        // 104.9 Hz sits nearest bin 2 (86.1 Hz) vs bin 3 (129.2 Hz)
        assert_eq!(ranges, vec![(2, 2)]);
    }

    #[test_case(440.0, 3 ; "a4 in 302-549 Hz band")]
    #[test_case(2500.0, 6 ; "2.5 kHz in 1.8-3.3 kHz band")]
    #[test_case(8000.0, 8 ; "8 kHz in 6.0-11 kHz band")]
    fn test_sine_peaks_in_containing_band(freq: f64, band: usize) {
        let mut a = analyzer();
        assert!(!a.process_block(&stereo_sine(freq, 1024)));

        let edges = a.band_edges().to_vec();
        assert!(edges[band] <= freq && freq < edges[band + 1]);

        let levels = a.levels();
        assert_eq!(loudest_band(levels), band);
        assert_relative_eq!(levels[band], 0.0);
        assert!(levels.iter().all(|&db| db <= 0.0));
    }

    #[test]
    fn test_short_block_is_zero_padded() {
        let mut a = analyzer();
        a.process_block(&stereo_sine(2500.0, 300));
        assert_eq!(loudest_band(a.levels()), 6);
    }

    #[test]
    fn test_silence_sits_at_floor() {
        let mut a = analyzer();
        a.process_block(&vec![0.0; 2048]);
        for &db in a.levels() {
            assert_relative_eq!(db, -120.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_listener_called_every_fourth_block() {
        let mut a = analyzer();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        a.set_listener(Box::new(move |levels: &[f64]| {
            sink.lock().unwrap().push(levels.to_vec());
        }));

        let block = stereo_sine(1000.0, 1024);
        let emitted: Vec<bool> = (0..9).map(|_| a.process_block(&block)).collect();

        assert_eq!(
            emitted,
            vec![false, false, false, true, false, false, false, true, false]
        );
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].len(), 10);
    }

    #[test]
    fn test_empty_block_does_not_count() {
        let mut a = analyzer();
        assert!(!a.process_block(&[]));
        assert_eq!(a.analyzed_blocks(), 0);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..AnalyzerConfig::default()
        };
        assert!(SpectrumAnalyzer::new(&config, FS).is_err());
    }
}
