//! Audio Block Management
//!
//! The fixed-capacity working block the pipeline fills from decoded frames,
//! plus the 16-bit PCM conversions on either side of it.

// ============================================================================
// Constants
// ============================================================================

/// Scale between i16 samples and the normalized float range
pub const PCM16_SCALE: f32 = 32768.0;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

// ============================================================================
// Sample Conversion
// ============================================================================

/// Convert a 16-bit sample to the normalized range [-1, 1)
#[inline]
pub fn i16_to_sample(value: i16) -> f32 {
    f32::from(value) / PCM16_SCALE
}

/// Convert a normalized sample to 16 bits
///
/// The value is clamped to [-1, 1] first and the positive end saturates at
/// `i16::MAX`, so out-of-range input can never wrap.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let scaled = (sample.clamp(-1.0, 1.0) * PCM16_SCALE).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Encode samples as 16-bit little-endian PCM, appending to `out`
pub fn encode_pcm16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
}

/// Decode 16-bit little-endian PCM; a trailing odd byte is ignored
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ============================================================================
// AudioBlock
// ============================================================================

/// Fixed-capacity buffer of interleaved samples
///
/// Storage is allocated once; `len` tracks how many samples are valid so a
/// short final block is handed on with its true length.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Vec<f32>,
    len: usize,
    channels: usize,
}

impl AudioBlock {
    /// Create a block holding `frames` frames of `channels` samples each
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels],
            len: 0,
            channels,
        }
    }

    /// Total samples the block can hold
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Valid samples currently held
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.samples.len()
    }

    /// Whole frames currently held
    pub fn frames(&self) -> usize {
        self.len / self.channels.max(1)
    }

    /// Append as many samples from `input` as fit
    ///
    /// Returns how many were consumed; the caller flushes the block and
    /// pushes the rest once it fills.
    pub fn push_pcm16(&mut self, input: &[i16]) -> usize {
        let room = self.samples.len() - self.len;
        let take = room.min(input.len());
        for (slot, &value) in self.samples[self.len..self.len + take]
            .iter_mut()
            .zip(input)
        {
            *slot = i16_to_sample(value);
        }
        self.len += take;
        take
    }

    /// Append normalized samples; same contract as [`push_pcm16`](Self::push_pcm16)
    pub fn push_samples(&mut self, input: &[f32]) -> usize {
        let room = self.samples.len() - self.len;
        let take = room.min(input.len());
        self.samples[self.len..self.len + take].copy_from_slice(&input[..take]);
        self.len += take;
        take
    }

    /// Append up to `count` zero samples; returns how many fit
    pub fn push_silence(&mut self, count: usize) -> usize {
        let take = (self.samples.len() - self.len).min(count);
        self.samples[self.len..self.len + take].fill(0.0);
        self.len += take;
        take
    }

    /// The valid samples
    pub fn as_slice(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    /// The valid samples, for in-place processing
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples[..self.len]
    }

    /// Forget the contents; storage is kept
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
