//! Audio I/O for eqstream
//!
//! The decode side yields interleaved stereo i16 frame groups one at a time;
//! the persisted side is a 16-bit PCM WAV file whose header is completed when
//! the session finalizes it.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::engine::buffer::BYTES_PER_SAMPLE;
use crate::error::{EqError, Result};

/// Channels delivered by every frame source
pub const OUTPUT_CHANNELS: usize = 2;

// ============================================================================
// Decode Side
// ============================================================================

/// Supplier of decoded interleaved stereo frames
pub trait FrameSource {
    /// Sample rate of the delivered frames
    fn sample_rate(&self) -> u32;

    /// Next group of interleaved stereo samples, `None` at end of stream
    ///
    /// The slice stays valid until the next call.
    fn next_frame_group(&mut self) -> Result<Option<&[i16]>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn next_frame_group(&mut self) -> Result<Option<&[i16]>> {
        (**self).next_frame_group()
    }
}

/// Compressed or PCM file decoded through symphonia
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    sample_buf: Option<SampleBuffer<i16>>,
    frames: Vec<i16>,
    skipped_packets: u64,
}

impl SymphoniaSource {
    /// Open and probe an audio file
    ///
    /// Fails before any audio is produced if the file is missing, the
    /// container is not recognized, or no decodable track exists.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EqError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| EqError::UnsupportedFormat {
                format: format!("{}: {}", path.display(), e),
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EqError::UnsupportedFormat {
                format: format!("{}: no audio track", path.display()),
            })?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| EqError::Decode {
            reason: "unknown sample rate".to_string(),
            source: None,
        })?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EqError::UnsupportedFormat {
                format: format!("{}: {}", path.display(), e),
            })?;

        info!(
            "Opened {} ({} Hz, {} channel(s))",
            path.display(),
            sample_rate,
            track.codec_params.channels.map_or(0, |c| c.count())
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            sample_buf: None,
            frames: Vec::new(),
            skipped_packets: 0,
        })
    }

    /// Packets dropped because they failed to decode
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }
}

impl FrameSource for SymphoniaSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_frame_group(&mut self) -> Result<Option<&[i16]>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("End of stream");
                    return Ok(None);
                }
                Err(e) => return Err(decode_error("failed to read packet", e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    self.skipped_packets += 1;
                    warn!("Skipping undecodable packet: {}", reason);
                    continue;
                }
                Err(e) => return Err(decode_error("decoder failed", e)),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let capacity = decoded.capacity() as u64;

            let needs_alloc = self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < decoded.capacity() * channels);
            if needs_alloc {
                self.sample_buf = Some(SampleBuffer::new(capacity, spec));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);

            to_stereo(sample_buf.samples(), channels, &mut self.frames);
            return Ok(Some(&self.frames));
        }
    }
}

fn decode_error(reason: &str, error: SymphoniaError) -> EqError {
    EqError::Decode {
        reason: format!("{}: {}", reason, error),
        source: Some(Box::new(error)),
    }
}

/// Rewrite interleaved samples of any channel count as stereo
///
/// Mono is duplicated to both sides; channels past the first two are dropped.
fn to_stereo(samples: &[i16], channels: usize, out: &mut Vec<i16>) {
    out.clear();
    match channels {
        0 => {}
        1 => out.extend(samples.iter().flat_map(|&s| [s, s])),
        2 => out.extend_from_slice(samples),
        _ => {
            for frame in samples.chunks_exact(channels) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

/// Frame groups held in memory, for fixtures and tests
#[derive(Debug, Clone)]
pub struct MemorySource {
    sample_rate: u32,
    groups: Vec<Vec<i16>>,
    next: usize,
    fail_at: Option<usize>,
}

impl MemorySource {
    pub fn new(sample_rate: u32, groups: Vec<Vec<i16>>) -> Self {
        Self {
            sample_rate,
            groups,
            next: 0,
            fail_at: None,
        }
    }

    /// Split interleaved samples into groups of `group_frames` frames
    pub fn from_interleaved(sample_rate: u32, samples: &[i16], group_frames: usize) -> Self {
        let group_len = (group_frames * OUTPUT_CHANNELS).max(OUTPUT_CHANNELS);
        let groups = samples.chunks(group_len).map(<[i16]>::to_vec).collect();
        Self::new(sample_rate, groups)
    }

    /// Report a decode error instead of the group at `index`
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Groups handed out so far
    pub fn delivered(&self) -> usize {
        self.next
    }
}

impl FrameSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_frame_group(&mut self) -> Result<Option<&[i16]>> {
        if self.fail_at == Some(self.next) {
            return Err(EqError::Decode {
                reason: format!("corrupt frame group {}", self.next),
                source: None,
            });
        }
        let index = self.next;
        if index >= self.groups.len() {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(&self.groups[index]))
    }
}

// ============================================================================
// Persisted Side
// ============================================================================

/// 16-bit PCM WAV file written block by block
///
/// The header goes out with placeholder sizes when the file is created and
/// is rewritten with the real data length by [`finalize`](Self::finalize).
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    bytes_written: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path, spec)?;
        debug!("Writing {} ({} Hz, {} ch)", path.display(), sample_rate, channels);

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PCM bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append 16-bit little-endian PCM bytes; a trailing odd byte is ignored
    pub fn write_pcm16le(&mut self, bytes: &[u8]) -> Result<()> {
        for pair in bytes.chunks_exact(BYTES_PER_SAMPLE) {
            self.writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        self.bytes_written += (bytes.len() - bytes.len() % BYTES_PER_SAMPLE) as u64;
        Ok(())
    }

    /// Complete the header with the true sizes and close the file
    ///
    /// Returns the number of PCM data bytes in the file.
    pub fn finalize(self) -> Result<u64> {
        self.writer.finalize()?;
        info!(
            "Finalized {} ({} data bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(self.bytes_written)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::encode_pcm16le;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    // ------------------------------------------------------------------------
    // Channel Mapping
    // ------------------------------------------------------------------------

    #[test]
    fn test_mono_is_duplicated() {
        let mut out = Vec::new();
        to_stereo(&[1, 2, 3], 1, &mut out);
        assert_eq!(out, vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_extra_channels_dropped() {
        let mut out = vec![99];
        to_stereo(&[1, 2, 3, 4, 5, 6], 3, &mut out);
        assert_eq!(out, vec![1, 2, 4, 5]);
    }

    // ------------------------------------------------------------------------
    // Memory Source
    // ------------------------------------------------------------------------

    #[test]
    fn test_memory_source_groups() {
        let samples: Vec<i16> = (0..10).collect();
        let mut source = MemorySource::from_interleaved(44100, &samples, 2);

        assert_eq!(source.next_frame_group().unwrap(), Some(&[0, 1, 2, 3][..]));
        assert_eq!(source.next_frame_group().unwrap(), Some(&[4, 5, 6, 7][..]));
        assert_eq!(source.next_frame_group().unwrap(), Some(&[8, 9][..]));
        assert_eq!(source.next_frame_group().unwrap(), None);
        assert_eq!(source.next_frame_group().unwrap(), None);
    }

    #[test]
    fn test_memory_source_injected_failure() {
        let mut source = MemorySource::new(44100, vec![vec![0; 4]; 3]).fail_at(1);
        assert!(source.next_frame_group().unwrap().is_some());
        let err = source.next_frame_group().unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
        assert_eq!(source.delivered(), 1);
    }

    // ------------------------------------------------------------------------
    // Symphonia Source
    // ------------------------------------------------------------------------

    #[test]
    fn test_missing_input_file() {
        let dir = tempdir().unwrap();
        let err = SymphoniaSource::open(&dir.path().join("missing.mp3")).err().unwrap();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_decodes_wav_fixture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let samples: Vec<i16> = (0..2000).map(|i| ((i * 37) % 2000 - 1000) as i16).collect();

        let mut sink = WavSink::create(&path, 44100, 2).unwrap();
        let mut bytes = Vec::new();
        for &s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        sink.write_pcm16le(&bytes).unwrap();
        sink.finalize().unwrap();

        let mut source = SymphoniaSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 44100);

        let mut decoded = Vec::new();
        while let Some(group) = source.next_frame_group().unwrap() {
            decoded.extend_from_slice(group);
        }
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x5a; 512]).unwrap();
        assert!(SymphoniaSource::open(&path).is_err());
    }

    // ------------------------------------------------------------------------
    // WAV Sink
    // ------------------------------------------------------------------------

    #[test]
    fn test_wav_header_sizes_after_finalize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path, 44100, 2).unwrap();
        let mut bytes = Vec::new();
        encode_pcm16le(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], &mut bytes);
        sink.write_pcm16le(&bytes).unwrap();
        sink.write_pcm16le(&bytes[..4]).unwrap();
        assert_eq!(sink.bytes_written(), 16);
        assert_eq!(sink.finalize().unwrap(), 16);

        let file = std::fs::read(&path).unwrap();
        assert_eq!(&file[0..4], b"RIFF");
        assert_eq!(&file[36..40], b"data");
        assert_eq!(read_u32_le(&file, 40), 16);
        assert_eq!(read_u32_le(&file, 4), 16 + 36);
        assert_eq!(file.len(), 44 + 16);
    }

    #[test]
    fn test_empty_session_still_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        WavSink::create(&path, 48000, 2).unwrap().finalize().unwrap();

        let file = std::fs::read(&path).unwrap();
        assert_eq!(read_u32_le(&file, 40), 0);
        assert_eq!(read_u32_le(&file, 4), 36);
        assert_eq!(read_u32_le(&file, 24), 48000);
    }
}
