//! Error types for the Apollo voice loop

use thiserror::Error;

/// Result type alias for Apollo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice loop
///
/// Only [`Error::Device`] and [`Error::DeviceBusy`] are allowed to end the
/// turn loop; everything else is absorbed inside the turn that raised it.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device failure
    #[error("audio device error: {0}")]
    Device(String),

    /// A second capture handle was requested while one is open
    #[error("audio device busy: an input stream is already open")]
    DeviceBusy,

    /// Speech recognition failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Text generation backend failure
    #[error("reply error: {0}")]
    Reply(String),

    /// Text-to-speech or playback subprocess failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error must terminate the turn loop
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_) | Self::DeviceBusy)
    }
}
