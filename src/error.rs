//! Error handling for Mixdeck
//!
//! Expected failure modes (decode, permission, export) are reported through
//! these values. Invalid operations on unknown ids are not errors: the store
//! treats them as no-ops.

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for Mixdeck operations
pub type Result<T> = std::result::Result<T, MixdeckError>;

/// Main error type for Mixdeck operations
#[derive(Error, Debug)]
pub enum MixdeckError {
    // Decode Errors
    #[error("Failed to decode audio: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decoded audio contains no samples")]
    EmptyAudio,

    // Capture Errors
    #[error("Capture permission denied")]
    PermissionDenied,

    #[error("Capture input unavailable: {reason}")]
    CaptureUnavailable { reason: String },

    #[error("No track selected for recording")]
    NoTrackSelected,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    // Export Errors
    #[error("Export failed: {reason}")]
    Export { reason: String },

    // Backend Errors
    #[error("Audio backend error: {0}")]
    Backend(#[from] BackendError),

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MixdeckError {
    /// Build a decode error from any underlying decoder failure
    pub fn decode<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MixdeckError::Decode {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build an export error
    pub fn export(reason: impl Into<String>) -> Self {
        MixdeckError::Export {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            MixdeckError::Decode { .. } => "DECODE_ERROR",
            MixdeckError::EmptyAudio => "EMPTY_AUDIO",
            MixdeckError::PermissionDenied => "PERMISSION_DENIED",
            MixdeckError::CaptureUnavailable { .. } => "CAPTURE_UNAVAILABLE",
            MixdeckError::NoTrackSelected => "NO_TRACK_SELECTED",
            MixdeckError::AlreadyRecording => "ALREADY_RECORDING",
            MixdeckError::NotRecording => "NOT_RECORDING",
            MixdeckError::Export { .. } => "EXPORT_ERROR",
            MixdeckError::Backend(_) => "BACKEND_ERROR",
            MixdeckError::InvalidConfig { .. } => "INVALID_CONFIG",
            MixdeckError::Io(_) => "IO_ERROR",
            MixdeckError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the caller can continue working after this error
    ///
    /// None of these leave project state half-mutated, but some need user
    /// action (granting permission, choosing a track) before a retry helps.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MixdeckError::Decode { .. } => true,
            MixdeckError::EmptyAudio => true,
            MixdeckError::NoTrackSelected => true,
            MixdeckError::AlreadyRecording => true,
            MixdeckError::NotRecording => true,
            MixdeckError::Export { .. } => true,
            MixdeckError::CaptureUnavailable { .. } => true,
            MixdeckError::PermissionDenied => false,
            MixdeckError::Backend(_) => false,
            MixdeckError::InvalidConfig { .. } => false,
            MixdeckError::Io(_) => false,
            MixdeckError::Serialization(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MixdeckError::PermissionDenied.error_code(), "PERMISSION_DENIED");
        assert_eq!(MixdeckError::export("boom").error_code(), "EXPORT_ERROR");
        assert_eq!(
            MixdeckError::Backend(BackendError::new("gone")).error_code(),
            "BACKEND_ERROR"
        );
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header");
        let err = MixdeckError::decode("not a wav file", io);
        assert!(err.is_recoverable());
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Failed to decode audio: not a wav file");
    }

    #[test]
    fn test_permission_is_not_recoverable() {
        assert!(!MixdeckError::PermissionDenied.is_recoverable());
    }
}
