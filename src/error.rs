use std::path::PathBuf;
use thiserror::Error;

/// Errors reading a transcript file
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("transcript not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read transcript {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TranscriptError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors reading a project directory or its index
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session index {path}: {message}")]
    MalformedIndex { path: PathBuf, message: String },
}

/// Errors reading a single task file
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to read task file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed task file {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}
