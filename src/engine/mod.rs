//! Audio Engine Module
//!
//! Streaming side of a playback session:
//! - Working block and PCM16 conversion
//! - Frame sources and the WAV file sink
//! - Best-effort playback output
//! - Session state machine
//! - The block pipeline tying them together

pub mod buffer;
pub mod io;
pub mod pipeline;
pub mod playback;
pub mod transport;

pub use buffer::{encode_pcm16le, AudioBlock};
pub use io::{FrameSource, MemorySource, SymphoniaSource, WavSink};
pub use pipeline::{SessionSummary, StreamPipeline};
pub use playback::{PlaybackSink, PlaybackStage};
pub use transport::{PipelineState, SessionHandle};
