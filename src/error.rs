//! Error types and handling.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Frame shorter than a field requires, or an unparseable trailer
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// IMEI not present in the directory after a fresh cache rebuild
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Device directory could not be reached
    #[error("Device directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Position sink write failed
    #[error("Position sink error: {0}")]
    Sink(String),

    /// Network or file I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a malformed-frame error with message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a directory-unavailable error with message
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::DirectoryUnavailable(msg.into())
    }

    /// Create a sink error with message
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a config error with message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
