use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GenerateError>;

/// Failure of one generation run. A run either returns a complete torrent
/// or exactly one of these; nothing partial is ever handed back.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("path does not exist: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("source should be a directory: {}", path.display())]
    InputNotADirectory { path: PathBuf },

    #[error("cannot read {} at byte {offset}", path.display())]
    UnreadableFile {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("path is not valid UTF-8: {}", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("invalid file filter {pattern:?}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("no content to hash under {}", path.display())]
    EmptyContentSet { path: PathBuf },

    #[error("invalid piece size {size}: must be a power of two no larger than 64 MiB")]
    InvalidPieceSize { size: u64 },

    #[error("cannot start hashing workers")]
    Workers(#[source] rayon::ThreadPoolBuildError),

    #[error("cancelled")]
    Cancelled,

    #[error("encoding invariant violated: {0}")]
    EncodingInvariantViolation(String),
}

impl GenerateError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, offset: u64, source: io::Error) -> Self {
        GenerateError::UnreadableFile { path: path.into(), offset, source }
    }

    /// Caller-requested stop, as opposed to anything wrong with the input.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerateError::Cancelled)
    }
}
