//! Error types for the lip-sync core.

/// Top-level error type for the avatar lip-sync core.
#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    /// No speech-synthesis capability is present (or it reports itself unavailable).
    #[error("speech synthesis unavailable")]
    SpeechUnavailable,

    /// The speech engine refused or failed to begin an utterance.
    #[error("speech engine error: {0}")]
    Engine(String),

    /// The envelope estimator was started without an audio source.
    #[error("no audio source to follow")]
    AudioSourceMissing,

    /// Audio device, stream or file error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Reply payload could not be interpreted.
    #[error("reply error: {0}")]
    Reply(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LipSyncError>;
