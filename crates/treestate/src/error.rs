use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TreeStateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IO error at {path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Record parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TreeStateError>;

impl TreeStateError {
    /// Wraps an I/O error together with the path it concerns.
    pub fn at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error means the path no longer exists.
    pub fn is_vanished(&self) -> bool {
        match self {
            Self::Io(err) | Self::PathIo { source: err, .. } => {
                err.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<std::collections::TryReserveError> for TreeStateError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory(err.to_string())
    }
}
