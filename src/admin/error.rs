use std::path::{Path, PathBuf};

use crate::types::TapeError;
use thiserror::Error;

/// Failures raised while opening or inspecting a region file.
#[derive(Debug, Error)]
pub enum AdminError {
    /// No file at the region path.
    #[error("region file not found: {0}")]
    MissingRegion(PathBuf),
    /// A layout field is neither recorded in a region header nor given
    /// explicitly.
    #[error("{field} is not recorded in the region header; pass it explicitly")]
    UnresolvedLayout {
        /// Name of the missing layout field.
        field: &'static str,
    },
    /// The region was mapped but its tape could not be indexed.
    #[error("cannot index {}: {source}", path.display())]
    Index {
        /// Region file being indexed.
        path: PathBuf,
        /// Scan failure reported by the store.
        #[source]
        source: TapeError,
    },
    /// Core tape error.
    #[error(transparent)]
    Core(#[from] TapeError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_region(path: impl AsRef<Path>) -> Self {
        AdminError::MissingRegion(path.as_ref().to_path_buf())
    }

    pub(crate) fn unresolved(field: &'static str) -> Self {
        AdminError::UnresolvedLayout { field }
    }

    pub(crate) fn index(path: impl AsRef<Path>, source: TapeError) -> Self {
        AdminError::Index {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Underlying tape error, if the failure came from the storage layer.
    pub fn tape_error(&self) -> Option<&TapeError> {
        match self {
            AdminError::Index { source, .. } | AdminError::Core(source) => Some(source),
            _ => None,
        }
    }
}
