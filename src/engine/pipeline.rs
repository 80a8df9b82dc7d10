//! Stream Pipeline
//!
//! The block loop of a playback session. Decoded frame groups are packed
//! into a fixed-capacity block; every full block is equalized, analyzed,
//! encoded to 16-bit PCM, and written to the playback device and the WAV
//! file. End of input, a stop request, or a decode error drains the partial
//! block and finalizes the file.
//!
//! The equalizer lags its input by a fixed number of frames. The pipeline
//! discards that many frames from the head of its output and pushes the
//! same amount of silence through at drain, so the file holds exactly one
//! output frame per input frame, aligned with the input.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::Config;
use crate::dsp::{BandGains, EqualizerEngine, SpectrumAnalyzer};
use crate::engine::buffer::{encode_pcm16le, AudioBlock, BYTES_PER_SAMPLE};
use crate::engine::io::{FrameSource, WavSink, OUTPUT_CHANNELS};
use crate::engine::playback::PlaybackStage;
use crate::engine::transport::SessionHandle;
use crate::error::{EqError, Result};

/// Totals reported when a session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Blocks processed, the final partial block included
    pub blocks: u64,
    /// Interleaved samples written to the file
    pub samples: u64,
    /// PCM bytes in the output file
    pub data_bytes: u64,
    pub playback_failures: u64,
    /// No playback device was ever open
    pub silent_mode: bool,
    pub output_path: PathBuf,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks, {} samples, {} bytes -> {}",
            self.blocks,
            self.samples,
            self.data_bytes,
            self.output_path.display()
        )?;
        if self.silent_mode {
            write!(f, " (silent)")?;
        } else if self.playback_failures > 0 {
            write!(f, " ({} playback failures)", self.playback_failures)?;
        }
        Ok(())
    }
}

/// One playback session from decoded frames to finalized file
pub struct StreamPipeline {
    engine: EqualizerEngine,
    analyzer: Option<SpectrumAnalyzer>,
    playback: PlaybackStage,
    output_path: PathBuf,
    session: SessionHandle,
    block: AudioBlock,
    encoded: Vec<u8>,
    /// Engine latency in interleaved samples
    latency: usize,
    /// Leading output samples still to drop
    to_discard: usize,
    pushed: u64,
    blocks: u64,
    samples: u64,
}

impl StreamPipeline {
    /// Nothing touches the filesystem until [`run`](Self::run)
    pub fn new(
        engine: EqualizerEngine,
        block_frames: usize,
        output_path: &Path,
        playback: PlaybackStage,
    ) -> Result<Self> {
        if block_frames == 0 {
            return Err(EqError::invalid_config("block_frames must be positive"));
        }
        if engine.channels() != OUTPUT_CHANNELS {
            return Err(EqError::invalid_config(format!(
                "pipeline carries {} channels, equalizer has {}",
                OUTPUT_CHANNELS,
                engine.channels()
            )));
        }

        let mut engine = engine;
        let block = AudioBlock::new(block_frames, engine.channels());
        engine.reserve(block.capacity());
        let latency = engine.latency_frames() * engine.channels();

        Ok(Self {
            engine,
            analyzer: None,
            playback,
            output_path: output_path.to_path_buf(),
            session: SessionHandle::new(),
            encoded: Vec::with_capacity(block.capacity() * BYTES_PER_SAMPLE),
            block,
            latency,
            to_discard: latency,
            pushed: 0,
            blocks: 0,
            samples: 0,
        })
    }

    /// Build the engine, and the analyzer if enabled, from a validated config
    pub fn from_config(config: &Config, playback: PlaybackStage) -> Result<Self> {
        config.validate()?;
        let engine = EqualizerEngine::new(&config.equalizer, config.pipeline.channels)?;
        let pipeline = Self::new(
            engine,
            config.pipeline.block_frames,
            &config.pipeline.output_path,
            playback,
        )?;

        if config.analyzer.enabled {
            let analyzer = SpectrumAnalyzer::new(&config.analyzer, config.equalizer.sample_rate)?;
            Ok(pipeline.with_analyzer(analyzer))
        } else {
            Ok(pipeline)
        }
    }

    pub fn with_analyzer(mut self, analyzer: SpectrumAnalyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn analyzer_mut(&mut self) -> Option<&mut SpectrumAnalyzer> {
        self.analyzer.as_mut()
    }

    /// Handle for stopping the session from another thread
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Gain cells the control channel writes to
    pub fn gains(&self) -> Arc<BandGains> {
        self.engine.gains()
    }

    pub fn engine(&self) -> &EqualizerEngine {
        &self.engine
    }

    /// Stream `source` to completion
    ///
    /// The output file is finalized on every path that gets past start-up,
    /// including a decode error mid-stream, which is returned afterwards.
    pub fn run<S: FrameSource + ?Sized>(mut self, source: &mut S) -> Result<SessionSummary> {
        if source.sample_rate() != self.engine.sample_rate() {
            return Err(EqError::invalid_config(format!(
                "input is {} Hz but the equalizer was designed for {} Hz",
                source.sample_rate(),
                self.engine.sample_rate()
            )));
        }

        self.session.start()?;
        info!(
            "Session started: {} bands, {}-frame blocks, output {}",
            self.engine.num_bands(),
            self.block.capacity() / self.engine.channels(),
            self.output_path.display()
        );

        let channels = self.engine.channels() as u16;
        let mut wav = match WavSink::create(&self.output_path, self.engine.sample_rate(), channels)
        {
            Ok(wav) => wav,
            Err(e) => {
                self.playback.finish();
                self.session.finish();
                return Err(e);
            }
        };

        let streamed = self.stream(source, &mut wav);

        if let Err(e) = self.session.begin_drain() {
            warn!("Unexpected session state while draining: {}", e);
        }
        let drained = self.drain(&mut wav);
        let finalized = wav.finalize();

        self.playback.finish();
        self.session.finish();

        streamed?;
        drained?;
        let data_bytes = finalized?;

        let summary = SessionSummary {
            blocks: self.blocks,
            samples: self.samples,
            data_bytes,
            playback_failures: self.playback.total_failures(),
            silent_mode: self.playback.is_silent(),
            output_path: self.output_path.clone(),
        };
        info!("Session finished: {}", summary);
        Ok(summary)
    }

    /// Pull frame groups until end of input, a stop request, or an error
    fn stream<S: FrameSource + ?Sized>(&mut self, source: &mut S, wav: &mut WavSink) -> Result<()> {
        loop {
            if self.session.stop_requested() {
                info!("Stop requested, draining");
                return Ok(());
            }

            let mut pending = match source.next_frame_group() {
                Ok(Some(group)) => group,
                Ok(None) => return Ok(()),
                Err(e) => {
                    error!("Decoding failed, ending session: {}", e);
                    return Err(e);
                }
            };

            while !pending.is_empty() {
                let taken = self.block.push_pcm16(pending);
                self.pushed += taken as u64;
                pending = &pending[taken..];
                if self.block.is_full() {
                    self.process_block(wav)?;
                }
            }
        }
    }

    /// Flush the engine's delayed tail, then the final partial block
    fn drain(&mut self, wav: &mut WavSink) -> Result<()> {
        if self.pushed > 0 {
            let mut silence = self.latency;
            while silence > 0 {
                silence -= self.block.push_silence(silence);
                if self.block.is_full() {
                    self.process_block(wav)?;
                }
            }
        }
        self.process_block(wav)
    }

    /// Run the held samples through every stage and empty the block
    fn process_block(&mut self, wav: &mut WavSink) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        self.engine.process_in_place(self.block.as_mut_slice());
        self.blocks += 1;

        let skip = self.to_discard.min(self.block.len());
        self.to_discard -= skip;
        let output = &self.block.as_slice()[skip..];

        if !output.is_empty() {
            if let Some(analyzer) = self.analyzer.as_mut() {
                analyzer.process_block(output);
            }

            self.encoded.clear();
            encode_pcm16le(output, &mut self.encoded);

            self.playback.write(&self.encoded);
            wav.write_pcm16le(&self.encoded)?;
            self.samples += output.len() as u64;
        }

        self.block.clear();
        Ok(())
    }
}
