//! Error types for the live radio player

/// Result type alias for live radio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or driving the player
///
/// None of these ever reach the UI layer through the player handle: stream
/// failures are turned into [`PlaybackState`](crate::PlaybackState) changes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Stream answered with a non-success status
    #[error("Stream returned status {status}: {url}")]
    Status { status: u16, url: String },

    /// MP3 decoding failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio output device error
    #[error("Audio output error: {0}")]
    Output(String),

    /// The backend refused a command (no source, released handle...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an output error
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }
}
