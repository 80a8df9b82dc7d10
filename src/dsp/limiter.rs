//! Block Limiter
//!
//! Soft peak limiting over a whole block followed by a hard clamp.
//! Scaling the entire block keeps relative dynamics inside it intact.

/// Default block peak ceiling
pub const DEFAULT_THRESHOLD: f32 = 0.95;

/// Soft limiter applied to one block at a time
#[derive(Debug, Clone, Copy)]
pub struct BlockLimiter {
    threshold: f32,
}

impl Default for BlockLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl BlockLimiter {
    /// Create a limiter with the given peak ceiling (clamped to (0, 1])
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(f32::EPSILON, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Limit `block` in place
    ///
    /// Returns the scale factor applied when the peak exceeded the
    /// threshold, `None` when the block was left at its level.
    pub fn process(&self, block: &mut [f32]) -> Option<f32> {
        let peak = peak_abs(block);

        let scale = if peak > self.threshold {
            let scale = self.threshold / peak;
            for sample in block.iter_mut() {
                *sample *= scale;
            }
            Some(scale)
        } else {
            None
        };

        hard_clip(block);
        scale
    }
}

/// Largest absolute sample value in `block`
#[inline]
pub fn peak_abs(block: &[f32]) -> f32 {
    block.iter().fold(0.0_f32, |peak, &s| peak.max(s.abs()))
}

/// Clamp every sample to [-1, 1]
#[inline]
pub fn hard_clip(block: &mut [f32]) {
    for sample in block.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}
