//! FIR band-pass filters
//!
//! Coefficients come from the difference of two ideal low-pass responses,
//! shaped by a Hamming window. `BandFilter` streams samples through the
//! taps using a circular delay line, so history carries across blocks.

use std::f64::consts::PI;

use crate::error::{EqError, Result};

/// Reference gain magnitude below which normalization is skipped
const MIN_NORMALIZATION_GAIN: f64 = 1e-9;

/// Cutoffs and length of one band-pass filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub sample_rate: f64,
    pub low_hz: f64,
    pub high_hz: f64,
    /// Half-width K; the filter has 2K+1 taps
    pub half_width: usize,
}

impl FilterSpec {
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64, half_width: usize) -> Self {
        Self {
            sample_rate,
            low_hz,
            high_hz,
            half_width,
        }
    }

    /// Number of taps (2K+1)
    pub fn num_taps(&self) -> usize {
        2 * self.half_width + 1
    }

    /// Check 0 <= low < high <= fs/2 and K >= 1
    pub fn validate(&self) -> Result<()> {
        let in_range = self.sample_rate > 0.0
            && self.low_hz >= 0.0
            && self.low_hz < self.high_hz
            && self.high_hz <= self.sample_rate / 2.0;

        if !in_range {
            return Err(EqError::InvalidFilter {
                low_hz: self.low_hz,
                high_hz: self.high_hz,
                sample_rate: self.sample_rate,
            });
        }
        if self.half_width < 1 {
            return Err(EqError::invalid_config("filter half-width must be at least 1"));
        }
        Ok(())
    }
}

/// Ideal low-pass impulse response at centered index `k`
#[inline]
fn ideal_low_pass(wc: f64, k: f64) -> f64 {
    if k == 0.0 {
        wc / PI
    } else {
        (wc * k).sin() / (PI * k)
    }
}

/// Zero-phase amplitude of symmetric `taps` at angular frequency `omega`
///
/// At `omega = 0` this is simply the sum of the taps.
pub fn amplitude_at(taps: &[f64], half_width: usize, omega: f64) -> f64 {
    taps.iter()
        .enumerate()
        .map(|(n, &h)| h * (omega * (n as f64 - half_width as f64)).cos())
        .sum()
}

/// Angular frequency at which a band is normalized to unity gain
///
/// Bands starting at DC use DC (the tap sum); band-pass bands use their
/// geometric centre, since their DC response is stop-band leakage.
pub fn reference_omega(spec: &FilterSpec) -> f64 {
    if spec.low_hz <= 0.0 {
        0.0
    } else {
        2.0 * PI * (spec.low_hz * spec.high_hz).sqrt() / spec.sample_rate
    }
}

/// Design Hamming-windowed band-pass taps for `spec`
///
/// Inputs are trusted; use [`FilterSpec::validate`] first when they come
/// from outside. Taps are scaled to unity gain at [`reference_omega`]
/// unless that gain is numerically zero.
pub fn design_band_pass(spec: &FilterSpec) -> Vec<f64> {
    let n_taps = spec.num_taps();
    let k_half = spec.half_width as f64;
    let span = (n_taps - 1) as f64;

    let wc1 = 2.0 * PI * spec.low_hz / spec.sample_rate;
    let wc2 = 2.0 * PI * spec.high_hz / spec.sample_rate;

    let mut taps: Vec<f64> = (0..n_taps)
        .map(|n| {
            let k = n as f64 - k_half;
            let band_pass = ideal_low_pass(wc2, k) - ideal_low_pass(wc1, k);
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / span).cos();
            band_pass * window
        })
        .collect();

    let gain = amplitude_at(&taps, spec.half_width, reference_omega(spec));
    if gain.abs() >= MIN_NORMALIZATION_GAIN {
        for tap in &mut taps {
            *tap /= gain;
        }
    }

    taps
}

/// Streaming FIR filter with a circular delay line
#[derive(Debug, Clone)]
pub struct BandFilter {
    spec: FilterSpec,
    taps: Vec<f64>,
    delay_line: Vec<f32>,
    index: usize,
}

impl BandFilter {
    /// Design the taps for `spec` and start from silence
    pub fn new(spec: FilterSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self::from_taps(spec, design_band_pass(&spec)))
    }

    fn from_taps(spec: FilterSpec, taps: Vec<f64>) -> Self {
        Self {
            delay_line: vec![0.0; taps.len()],
            spec,
            taps,
            index: 0,
        }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Filter `samples` in place
    ///
    /// Each output is the dot product of the taps with the delay line read
    /// backwards from the newest sample.
    pub fn process_block(&mut self, samples: &mut [f32]) {
        let n = self.taps.len();
        for sample in samples.iter_mut() {
            self.delay_line[self.index] = *sample;

            // Newest sample pairs with tap 0, walking back through history:
            // `newer` ends at the slot just written, `older` wraps behind it
            let (newer, older) = self.delay_line.split_at(self.index + 1);
            let acc: f64 = newer
                .iter()
                .rev()
                .chain(older.iter().rev())
                .zip(&self.taps)
                .map(|(&x, &h)| h * f64::from(x))
                .sum();

            *sample = acc as f32;

            self.index += 1;
            if self.index == n {
                self.index = 0;
            }
        }
    }

    /// Push `samples` into the history without computing outputs
    ///
    /// Leaves the filter in the same state `process_block` would.
    pub fn feed_history(&mut self, samples: &[f32]) {
        let n = self.taps.len();
        for &sample in samples {
            self.delay_line[self.index] = sample;
            self.index += 1;
            if self.index == n {
                self.index = 0;
            }
        }
    }

    /// Clear the delay line
    pub fn reset(&mut self) {
        self.delay_line.fill(0.0);
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use test_case::test_case;

    const FS: f64 = 44100.0;

    fn sine(frequency: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f64 / FS).sin() as f32)
            .collect()
    }

    fn rms(samples: &[f32]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| f64::from(s).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_tap_count_and_symmetry() {
        let taps = design_band_pass(&FilterSpec::new(FS, 665.0, 2150.0, 64));
        assert_eq!(taps.len(), 129);
        for n in 0..taps.len() {
            assert_abs_diff_eq!(taps[n], taps[taps.len() - 1 - n], epsilon = 1e-12);
        }
    }

    #[test_case(100.0, 215.0 ; "low band")]
    #[test_case(665.0, 2150.0 ; "mid band")]
    #[test_case(2150.0, 6650.0 ; "upper mid band")]
    #[test_case(6650.0, 10000.0 ; "high band")]
    fn test_unity_gain_at_band_centre(low: f64, high: f64) {
        let spec = FilterSpec::new(FS, low, high, 64);
        let taps = design_band_pass(&spec);
        let gain = amplitude_at(&taps, 64, reference_omega(&spec));
        assert_abs_diff_eq!(gain, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_low_pass_band_normalizes_tap_sum() {
        let spec = FilterSpec::new(FS, 0.0, 2000.0, 32);
        let taps = design_band_pass(&spec);
        let sum: f64 = taps.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stop_band_stays_small() {
        // DC leakage of a band-pass must not be blown up into a huge gain
        let spec = FilterSpec::new(FS, 2150.0, 6650.0, 64);
        let taps = design_band_pass(&spec);
        let dc: f64 = taps.iter().sum();
        assert!(dc.abs() < 0.01, "dc gain {}", dc);
        let omega = 2.0 * PI * 15000.0 / FS;
        assert!(amplitude_at(&taps, 64, omega).abs() < 0.01);
    }

    #[test]
    fn test_full_band_is_near_identity() {
        let spec = FilterSpec::new(FS, 0.0, FS / 2.0, 32);
        let taps = design_band_pass(&spec);
        let sum: f64 = taps.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);

        // The centre tap carries essentially all of the response
        assert_abs_diff_eq!(taps[32], 1.0, epsilon = 1e-6);
        for (n, tap) in taps.iter().enumerate().filter(|(n, _)| *n != 32) {
            assert!(tap.abs() < 1e-6, "tap {} = {}", n, tap);
        }
    }

    #[test]
    fn test_degenerate_band_skips_normalization() {
        // A sliver of a band gives a near-zero sum; taps must stay finite
        let spec = FilterSpec::new(FS, 1000.0, 1000.0 + 1e-9, 8);
        let taps = design_band_pass(&spec);
        assert!(taps.iter().all(|t| t.is_finite()));
        assert!(taps.iter().all(|t| t.abs() < 1e-6));
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(FilterSpec::new(FS, 100.0, 215.0, 64).validate().is_ok());
        assert!(FilterSpec::new(FS, 0.0, FS / 2.0, 1).validate().is_ok());
        assert!(FilterSpec::new(FS, 215.0, 100.0, 64).validate().is_err());
        assert!(FilterSpec::new(FS, -1.0, 100.0, 64).validate().is_err());
        assert!(FilterSpec::new(FS, 100.0, 30000.0, 64).validate().is_err());
        assert!(FilterSpec::new(FS, 100.0, 215.0, 0).validate().is_err());
        assert!(BandFilter::new(FilterSpec::new(FS, 300.0, 200.0, 8)).is_err());
    }

    #[test]
    fn test_impulse_response_equals_taps() {
        let mut filter = BandFilter::new(FilterSpec::new(FS, 665.0, 2150.0, 16)).unwrap();
        let mut block = vec![0.0_f32; 40];
        block[0] = 1.0;
        filter.process_block(&mut block);

        for (n, &tap) in filter.taps().iter().enumerate() {
            assert_abs_diff_eq!(f64::from(block[n]), tap, epsilon = 1e-6);
        }
        for &tail in &block[33..] {
            assert_abs_diff_eq!(tail, 0.0, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_block_boundaries_are_seamless() {
        let spec = FilterSpec::new(FS, 215.0, 665.0, 64);
        let input = sine(440.0, 3000);

        let mut whole = input.clone();
        BandFilter::new(spec).unwrap().process_block(&mut whole);

        let mut chunked = input.clone();
        let mut filter = BandFilter::new(spec).unwrap();
        for chunk in chunked.chunks_mut(97) {
            filter.process_block(chunk);
        }

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_feed_history_matches_processing_state() {
        let spec = FilterSpec::new(FS, 665.0, 2150.0, 32);
        let first = sine(1000.0, 500);
        let second = sine(1200.0, 300);

        let mut processed = BandFilter::new(spec).unwrap();
        let mut scratch = first.clone();
        processed.process_block(&mut scratch);

        let mut fed = BandFilter::new(spec).unwrap();
        fed.feed_history(&first);

        let mut a = second.clone();
        let mut b = second.clone();
        processed.process_block(&mut a);
        fed.process_block(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_passes_in_band_rejects_out_of_band() {
        let spec = FilterSpec::new(FS, 665.0, 2150.0, 64);

        let mut in_band = sine(1200.0, 8192);
        BandFilter::new(spec).unwrap().process_block(&mut in_band);

        let mut out_band = sine(8000.0, 8192);
        BandFilter::new(spec).unwrap().process_block(&mut out_band);

        // Skip the filter's warm-up
        let in_rms = rms(&in_band[512..]);
        let out_rms = rms(&out_band[512..]);
        assert!(in_rms > 0.4, "in-band rms too low: {}", in_rms);
        assert!(out_rms < 0.05, "out-of-band rms too high: {}", out_rms);
    }

    /// Deterministic white-ish noise in [-1, 1)
    fn noise(len: usize, mut seed: u32) -> Vec<f32> {
        (0..len)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                (seed as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }

    #[test_case(2, 665.0, 2150.0 ; "five taps")]
    #[test_case(16, 100.0, 215.0 ; "low band")]
    #[test_case(64, 2150.0, 6650.0 ; "full length")]
    fn test_matches_direct_convolution(half_width: usize, low: f64, high: f64) {
        let spec = FilterSpec::new(FS, low, high, half_width);
        let input = noise(1500, 0x9e37_79b9);

        let mut filter = BandFilter::new(spec).unwrap();
        let taps = filter.taps().to_vec();
        let mut output = input.clone();
        let mut start = 0;
        for len in [1, 7, 130, 3, 256, 64].iter().cycle() {
            if start >= output.len() {
                break;
            }
            let end = (start + len).min(output.len());
            filter.process_block(&mut output[start..end]);
            start = end;
        }

        for n in 0..input.len() {
            let expected: f64 = taps
                .iter()
                .enumerate()
                .take(n + 1)
                .map(|(k, &h)| h * f64::from(input[n - k]))
                .sum();
            assert_abs_diff_eq!(f64::from(output[n]), expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let spec = FilterSpec::new(FS, 100.0, 215.0, 8);
        let mut filter = BandFilter::new(spec).unwrap();
        let mut noise = sine(150.0, 64);
        filter.process_block(&mut noise);
        filter.reset();

        let mut silence = vec![0.0_f32; 32];
        filter.process_block(&mut silence);
        assert!(silence.iter().all(|&s| s == 0.0));
    }
}
