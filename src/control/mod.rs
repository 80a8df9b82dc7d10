//! Live gain control
//!
//! A newline-delimited JSON channel through which an external controller
//! retunes band gains while a session is streaming. The listener only needs
//! the [`GainControl`] contract, which [`BandGains`] provides.

pub mod client;
pub mod message;
pub mod server;

pub use client::{send_message, send_messages};
pub use message::ControlMessage;
pub use server::{handle_line, ControlHandle, GainControlServer, MAX_LINE_BYTES};

use crate::dsp::BandGains;

/// Gain-setting contract the control channel drives
pub trait GainControl: Send + Sync {
    fn num_bands(&self) -> usize;

    /// Set one band in dB; `None` if the band does not exist
    fn set_band_gain_db(&self, band: usize, gain_db: f64) -> Option<f64>;

    fn band_label(&self, band: usize) -> Option<&str>;
}

impl GainControl for BandGains {
    fn num_bands(&self) -> usize {
        BandGains::num_bands(self)
    }

    fn set_band_gain_db(&self, band: usize, gain_db: f64) -> Option<f64> {
        BandGains::set_band_gain_db(self, band, gain_db)
    }

    fn band_label(&self, band: usize) -> Option<&str> {
        self.label(band)
    }
}
