use serde::Serialize;
use thiserror::Error;

/// Main error type for the recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Muxer or segment setup failed. Non-fatal: retried on the next access unit
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// A sample write failed. The segment continues best-effort
    #[error("sample write failed: {0}")]
    Write(String),

    /// A segment repository call failed. Logged, never blocks recording
    #[error("repository call failed: {0}")]
    Storage(String),

    /// No finalized segment overlaps the requested clip window
    #[error("no segments overlap the clip window")]
    NoSegments,

    /// Track extraction or muxing failed while building an event clip
    #[error("clip assembly failed: {0}")]
    ClipAssembly(String),

    /// A shutdown step failed. Logged, shutdown continues
    #[error("teardown step failed: {0}")]
    Teardown(String),

    /// The recorder has no running session
    #[error("recorder is not running")]
    NotRunning,

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the underlying container library
    #[error("container error: {0}")]
    Container(#[from] mp4::Error),
}

/// Coarse failure class carried on the event feed.
///
/// `RecorderEvent` must be `Clone` for the broadcast channel and
/// `std::io::Error` is not, so events carry the class plus a message
/// instead of the error value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Initialization,
    Write,
    Storage,
    NoSegments,
    ClipAssembly,
    Teardown,
    NotRunning,
    Io,
    Container,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::Initialization(_) => ErrorKind::Initialization,
            RecorderError::Write(_) => ErrorKind::Write,
            RecorderError::Storage(_) => ErrorKind::Storage,
            RecorderError::NoSegments => ErrorKind::NoSegments,
            RecorderError::ClipAssembly(_) => ErrorKind::ClipAssembly,
            RecorderError::Teardown(_) => ErrorKind::Teardown,
            RecorderError::NotRunning => ErrorKind::NotRunning,
            RecorderError::Io(_) => ErrorKind::Io,
            RecorderError::Container(_) => ErrorKind::Container,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RecorderError>;
