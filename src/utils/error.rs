use thiserror::Error;

/// Capture primitive and session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The capture handle could not be opened; fatal to the session attempt
    #[error("failed to open capture on {interface}: {reason}")]
    OpenFailure { interface: String, reason: String },

    /// No frame arrived within the read timeout
    #[error("capture read timed out")]
    Timeout,

    /// The source reported end of stream; the handle stays usable
    #[error("capture reached end of stream")]
    EndOfStream,

    /// The handle was closed; terminal for the worker
    #[error("capture handle closed")]
    Closed,

    /// Any other capture failure
    #[error("capture error: {0}")]
    Capture(String),
}

impl From<pcap::Error> for CaptureError {
    fn from(err: pcap::Error) -> Self {
        match err {
            pcap::Error::TimeoutExpired => CaptureError::Timeout,
            pcap::Error::NoMorePackets => CaptureError::EndOfStream,
            other => CaptureError::Capture(other.to_string()),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from capture operations
    #[error("Capture error: {0}")]
    CaptureError(#[from] CaptureError),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// No interface was given and none could be chosen
    #[error("No interface specified. Please select an interface first.")]
    NoInterface,
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
