//! Session State Machine for eqstream
//!
//! A streaming session moves through `Idle -> Streaming -> Draining ->
//! Stopped` exactly once. The state lives behind a [`SessionHandle`] that can
//! be cloned into other threads, so start and stop requests from anywhere are
//! serialized by one lock instead of racing on a bare flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{EqError, Result};

/// Lifecycle of one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Created, nothing decoded yet (default state)
    #[default]
    Idle,
    /// Pulling frames and processing full blocks
    Streaming,
    /// Input ended or stop requested; flushing the partial block
    Draining,
    /// Sinks finalized and released
    Stopped,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Streaming => "Streaming",
            PipelineState::Draining => "Draining",
            PipelineState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<PipelineState>,
    stop_requested: AtomicBool,
}

/// Cloneable handle to a session's state
///
/// # Example
/// ```
/// use eqstream::engine::{PipelineState, SessionHandle};
///
/// let session = SessionHandle::new();
/// session.start().unwrap();
/// assert_eq!(session.state(), PipelineState::Streaming);
///
/// // A second start is rejected
/// assert!(session.start().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        // The guarded value is a plain enum, so a poisoned lock is still usable
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        *self.lock()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Idle -> Streaming; any other starting state is an error
    pub fn start(&self) -> Result<()> {
        self.transition(PipelineState::Idle, PipelineState::Streaming)
    }

    /// Ask the session to stop
    ///
    /// A streaming session notices at its next frame group and drains. A
    /// session that never started goes straight to Stopped.
    ///
    /// # Example
    /// ```
    /// use eqstream::engine::{PipelineState, SessionHandle};
    ///
    /// let session = SessionHandle::new();
    /// session.request_stop();
    /// assert_eq!(session.state(), PipelineState::Stopped);
    /// ```
    pub fn request_stop(&self) {
        let mut state = self.lock();
        self.shared.stop_requested.store(true, Ordering::Release);
        if *state == PipelineState::Idle {
            *state = PipelineState::Stopped;
            debug!("[SESSION] Stopped before start");
        } else {
            debug!("[SESSION] Stop requested while {}", *state);
        }
    }

    /// Polled by the pipeline once per frame group
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Streaming -> Draining
    pub(crate) fn begin_drain(&self) -> Result<()> {
        self.transition(PipelineState::Streaming, PipelineState::Draining)
    }

    /// Any state -> Stopped; used on both normal and abnormal endings
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        debug!("[SESSION] {} -> Stopped", *state);
        *state = PipelineState::Stopped;
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> Result<()> {
        let mut state = self.lock();
        if *state != from {
            return Err(EqError::InvalidTransition {
                from: state.name(),
                to: to.name(),
            });
        }
        *state = to;
        debug!("[SESSION] {} -> {}", from, to);
        Ok(())
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    /// Streaming or draining
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            PipelineState::Streaming | PipelineState::Draining
        )
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PipelineState::Stopped
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
