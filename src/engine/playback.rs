//! Playback output
//!
//! The device is best-effort: opening it may fail (the session then runs
//! silently), and write failures are counted rather than propagated.
//! After [`MAX_CONSECUTIVE_FAILURES`] failed writes in a row the device is
//! closed for the rest of the session.

use log::{info, warn};

use crate::error::{EqError, Result};

/// Consecutive write failures tolerated before playback is disabled
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Sink for encoded 16-bit little-endian PCM
pub trait PlaybackSink {
    /// Queue one block of PCM bytes
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Wait for queued audio to play out
    fn drain(&mut self) -> Result<()>;

    /// Release the device
    fn close(&mut self);
}

/// Open the default output device
#[cfg(feature = "playback")]
pub fn open_default(sample_rate: u32, channels: u16) -> Result<Box<dyn PlaybackSink>> {
    Ok(Box::new(device::CpalSink::open(sample_rate, channels)?))
}

/// Open the default output device
#[cfg(not(feature = "playback"))]
pub fn open_default(_sample_rate: u32, _channels: u16) -> Result<Box<dyn PlaybackSink>> {
    Err(EqError::Playback {
        reason: "built without the `playback` feature".to_string(),
    })
}

/// Failure-tolerant wrapper the pipeline writes through
pub struct PlaybackStage {
    sink: Option<Box<dyn PlaybackSink>>,
    consecutive_failures: u32,
    total_failures: u64,
    silent: bool,
}

impl PlaybackStage {
    /// Stage with no device at all
    pub fn silent() -> Self {
        Self {
            sink: None,
            consecutive_failures: 0,
            total_failures: 0,
            silent: true,
        }
    }

    pub fn with_sink(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink: Some(sink),
            consecutive_failures: 0,
            total_failures: 0,
            silent: false,
        }
    }

    /// Use `opened` if it succeeded, otherwise fall back to silent mode
    pub fn from_open_result(opened: Result<Box<dyn PlaybackSink>>) -> Self {
        match opened {
            Ok(sink) => Self::with_sink(sink),
            Err(e) => {
                warn!("Playback unavailable, continuing in silent mode: {}", e);
                Self::silent()
            }
        }
    }

    /// True if no device was ever opened
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// True while writes still reach a device
    pub fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Write one block; failures are logged and counted, never returned
    pub fn write(&mut self, pcm: &[u8]) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };

        match sink.write(pcm) {
            Ok(()) => {
                self.consecutive_failures = 0;
                true
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.total_failures += 1;
                warn!(
                    "Playback write failed ({} in a row): {}",
                    self.consecutive_failures, e
                );

                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("Disabling playback for the rest of the session");
                    sink.close();
                    self.sink = None;
                }
                false
            }
        }
    }

    /// Drain and close the device, if one is still open
    pub fn finish(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.drain() {
                warn!("Playback drain failed: {}", e);
            }
            sink.close();
            info!("Playback closed");
        }
    }
}

impl Drop for PlaybackStage {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
    }
}

#[cfg(feature = "playback")]
mod device {
    //! cpal output backend

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::{debug, error};

    use super::PlaybackSink;
    use crate::engine::buffer::{decode_pcm16le, i16_to_sample};
    use crate::error::{EqError, Result};

    /// Roughly half a second of queued stereo audio at 44.1 kHz
    const QUEUE_CAPACITY: usize = 44_100;
    /// Longest a write waits for room in the queue
    const WRITE_TIMEOUT: Duration = Duration::from_millis(250);
    const POLL_INTERVAL: Duration = Duration::from_millis(2);

    pub struct CpalSink {
        stream: Option<cpal::Stream>,
        queue: Arc<Mutex<VecDeque<f32>>>,
        failed: Arc<AtomicBool>,
        sample_rate: u32,
        channels: u16,
    }

    fn playback_error(reason: impl std::fmt::Display) -> EqError {
        EqError::Playback {
            reason: reason.to_string(),
        }
    }

    impl CpalSink {
        pub fn open(sample_rate: u32, channels: u16) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| playback_error("no output device"))?;

            let config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let queue = Arc::new(Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)));
            let failed = Arc::new(AtomicBool::new(false));

            let queue_for_callback = Arc::clone(&queue);
            let failed_for_callback = Arc::clone(&failed);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let Ok(mut queue) = queue_for_callback.lock() else {
                            data.fill(0.0);
                            return;
                        };
                        for slot in data.iter_mut() {
                            *slot = queue.pop_front().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("Audio stream error: {}", err);
                        failed_for_callback.store(true, Ordering::Relaxed);
                    },
                    None,
                )
                .map_err(playback_error)?;

            stream.play().map_err(playback_error)?;

            debug!(
                "Playback on '{}' at {} Hz",
                device.name().unwrap_or_else(|_| "unknown".into()),
                sample_rate
            );

            Ok(Self {
                stream: Some(stream),
                queue,
                failed,
                sample_rate,
                channels,
            })
        }

        fn queued(&self) -> Result<usize> {
            self.queue
                .lock()
                .map(|q| q.len())
                .map_err(|_| playback_error("queue lock poisoned"))
        }
    }

    impl PlaybackSink for CpalSink {
        fn write(&mut self, pcm: &[u8]) -> Result<()> {
            if self.failed.load(Ordering::Relaxed) {
                return Err(playback_error("stream reported an error"));
            }

            let samples = decode_pcm16le(pcm);
            let deadline = Instant::now() + WRITE_TIMEOUT;
            while self.queued()? + samples.len() > QUEUE_CAPACITY.max(samples.len()) {
                if Instant::now() >= deadline {
                    return Err(playback_error("device queue full"));
                }
                thread::sleep(POLL_INTERVAL);
            }

            let mut queue = self
                .queue
                .lock()
                .map_err(|_| playback_error("queue lock poisoned"))?;
            queue.extend(samples.into_iter().map(i16_to_sample));
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            let frames = self.queued()? / usize::from(self.channels.max(1));
            let expected = Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate));
            let deadline = Instant::now() + expected + WRITE_TIMEOUT;

            while self.queued()? > 0 {
                if Instant::now() >= deadline {
                    return Err(playback_error("timed out draining playback"));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(())
        }

        fn close(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
            }
            if let Ok(mut queue) = self.queue.lock() {
                queue.clear();
            }
        }
    }
}
