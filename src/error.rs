use thiserror::Error;

use crate::audio::FileUrlData;

/// Why a single fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    /// Every attempt timed out.
    Timeout,
    /// Connection, DNS or TLS failure.
    Transport(String),
    /// The server answered with a non-2xx status.
    Status(u16),
    /// Reading a local file failed.
    Io(String),
}

/// A source index or audio file could not be retrieved.
#[derive(Debug, Clone, Error)]
#[error("{explanation}")]
pub struct FetchError {
    pub origin: String,
    pub explanation: String,
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(
        origin: impl Into<String>,
        explanation: impl Into<String>,
        cause: FetchCause,
    ) -> Self {
        Self {
            origin: origin.into(),
            explanation: explanation.into(),
            cause,
        }
    }

    /// HTTP status code, if the server responded at all.
    pub fn status(&self) -> Option<u16> {
        match self.cause {
            FetchCause::Status(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.cause == FetchCause::Timeout
    }

    /// Short label used in log lines and user-facing summaries.
    pub fn describe_short(&self) -> String {
        match &self.cause {
            FetchCause::Timeout => "Timeout".to_string(),
            FetchCause::Transport(_) => "TransportError".to_string(),
            FetchCause::Status(code) => code.to_string(),
            FetchCause::Io(_) => "IOError".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed source index document.
    #[error("audio source index is invalid: {0}")]
    InvalidSourceIndex(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Illegal use of a cache session. Indicates a bug in the caller.
    #[error("cache session error: {0}")]
    Cache(String),

    /// Something that must exist was never stored.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A configured source failed to load during reconciliation.
#[derive(Debug, Error)]
#[error("couldn't load audio source {name} ({url}): {error}")]
pub struct SourceError {
    pub name: String,
    pub url: String,
    #[source]
    pub error: Error,
}

/// One file in a download batch failed. Carries the original reference.
#[derive(Debug, Clone, Error)]
#[error("{} download failed: {error}", file.desired_filename)]
pub struct DownloadFailure {
    pub file: FileUrlData,
    #[source]
    pub error: FetchError,
}
