use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Setup failures while building the upload corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("error reading directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no valid items found in {path:?} (extensions: {extensions})")]
    NoValidItems { path: PathBuf, extensions: String },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("{0}")]
    Docker(String),
    #[error("no memory usage reported for {0}")]
    NoUsage(String),
    #[error("invalid process id {0:?}")]
    InvalidPid(String),
    #[error("process {0} not found")]
    ProcessNotFound(String),
    #[error("memory sampling task failed: {0}")]
    Task(String),
}

/// Why a single upload was classified as a failure.
///
/// Never propagated past the uploader; the dispatcher only counts it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("error creating form file: {0}")]
    Multipart(String),
    #[error("error creating request: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed with status: {0}")]
    Status(u16),
}

impl FailureReason {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_builder() {
            Self::Request(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
