//! Error types for detector construction, capture, configuration and the bank.

use thiserror::Error;

/// Invalid parameters for a detector or filter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("frequency {frequency} Hz must be below the Nyquist limit of {nyquist} Hz")]
    AboveNyquist { frequency: f32, nyquist: f32 },

    #[error("frequency must be finite and non-negative, got {0}")]
    InvalidFrequency(f32),

    #[error("sample rate must be positive")]
    InvalidSampleRate,

    #[error("filter needs at least one feed-forward coefficient")]
    EmptyFilter,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Capture adapter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Source not found: {0}")]
    InvalidSource(String),

    #[error("No audio input device found")]
    NoDevice,

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Failed to enumerate sources: {0}")]
    Enumeration(String),

    #[error("Capture stream disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum BankError {
    #[error(transparent)]
    Detector(#[from] DspError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Thread error: {0}")]
    Thread(String),
}
