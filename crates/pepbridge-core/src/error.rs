use std::io;
use std::path::{Path, PathBuf};

/// Failures surfaced by the build, install and verify operations.
///
/// Integrity findings of the bytecode verifier are not errors; they are
/// collected in a [`crate::verify::Report`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),
    #[error("file exists: {}", path.display())]
    FileExists { path: PathBuf },
    #[error("symlink reference path {} does not exist", path.display())]
    ReferenceMissing { path: PathBuf },
    #[error("invalid wheel {}: {reason}", wheel.display())]
    InvalidWheel { wheel: PathBuf, reason: String },
    #[error("backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },
    #[error("python platform query failed: {0}")]
    Platform(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_wheel(wheel: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidWheel {
            wheel: wheel.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is the recoverable "target already exists" condition.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::FileExists { .. })
    }
}

/// Attaches a human readable context to raw I/O failures.
pub trait IoContext<T> {
    /// # Errors
    /// Returns [`Error::Io`] wrapping the original failure.
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::Io {
            context: context(),
            source,
        })
    }
}
