//! Error handling for eqstream
//!
//! Errors fall into four classes: configuration errors raised before any
//! streaming starts, transient I/O errors recovered inside the session,
//! malformed control messages, and fatal I/O on the persisted file.

use thiserror::Error;

/// Result type alias for eqstream operations
pub type Result<T> = std::result::Result<T, EqError>;

/// Main error type for eqstream operations
#[derive(Error, Debug)]
pub enum EqError {
    // Configuration Errors
    #[error("Invalid filter band {low_hz}-{high_hz} Hz at {sample_rate} Hz sample rate")]
    InvalidFilter {
        low_hz: f64,
        high_hz: f64,
        sample_rate: f64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Input Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Decode error: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Output Errors
    #[error("Playback error: {reason}")]
    Playback { reason: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Session Errors
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    // Control Errors
    #[error("Malformed control message: {reason}")]
    MalformedMessage { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EqError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EqError::InvalidFilter { .. } => "INVALID_FILTER",
            EqError::InvalidConfig { .. } => "INVALID_CONFIG",
            EqError::ConfigParse(_) => "CONFIG_PARSE",
            EqError::FileNotFound { .. } => "FILE_NOT_FOUND",
            EqError::Decode { .. } => "DECODE_ERROR",
            EqError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            EqError::Playback { .. } => "PLAYBACK_ERROR",
            EqError::Wav(_) => "WAV_ERROR",
            EqError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EqError::MalformedMessage { .. } => "MALFORMED_MESSAGE",
            EqError::Io(_) => "IO_ERROR",
        }
    }

    /// Check if the session can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EqError::Playback { .. } | EqError::MalformedMessage { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        EqError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        EqError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EqError::FileNotFound {
            path: "song.mp3".to_string(),
            source: None,
        };
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
        assert_eq!(
            EqError::malformed("not json").error_code(),
            "MALFORMED_MESSAGE"
        );
    }

    #[test]
    fn test_recoverable_classes() {
        let playback = EqError::Playback {
            reason: "device gone".to_string(),
        };
        assert!(playback.is_recoverable());
        assert!(EqError::malformed("bad").is_recoverable());

        let filter = EqError::InvalidFilter {
            low_hz: 500.0,
            high_hz: 100.0,
            sample_rate: 44100.0,
        };
        assert!(!filter.is_recoverable());
        assert!(!EqError::invalid_config("zero block").is_recoverable());
    }

    #[test]
    fn test_bad_json_is_recoverable() {
        let err = crate::control::ControlMessage::parse("{\"type\":").unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_MESSAGE");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_display_mentions_band() {
        let err = EqError::InvalidFilter {
            low_hz: 100.0,
            high_hz: 30000.0,
            sample_rate: 44100.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("100-30000 Hz"), "unexpected message: {}", msg);
    }
}
