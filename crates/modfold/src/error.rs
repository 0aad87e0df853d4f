//! Error types for the overlay assembly pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, merging, or applying an
/// installation.
#[derive(Debug, Error)]
pub enum Error {
    /// Content, dependency, or path segment that should exist does not.
    #[error("{0} was not found")]
    NotFound(String),

    /// A structural invariant was violated: wrong node type at a path, an
    /// unresolved merge policy reaching the fold, a malformed request.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A name is already occupied by an incompatible entry.
    #[error("an entry named '{0}' already exists")]
    Collision(String),

    /// No registered archive reader could decode the payload; carries every
    /// attempted reader's failure.
    #[error("unsupported archive format ({})", .failures.join("; "))]
    UnsupportedFormat { failures: Vec<String> },

    #[error("I/O failure on '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mod descriptor or bundle manifest did not decode.
    #[error("malformed mod descriptor")]
    Descriptor(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidState(reason.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
