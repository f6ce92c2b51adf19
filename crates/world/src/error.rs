use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the region store.
///
/// An absent chunk is not an error; readers get `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The container (or an external chunk file it references) is malformed.
    #[error("region file {} is corrupt: {reason}", path.display())]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The operating system rejected a read or write.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The payload cannot be stored in a region container.
    #[error("chunk payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        len: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// No addressable sectors remain in the container.
    #[error("region file {} has no addressable sectors left", path.display())]
    RegionFull {
        /// Container that is full.
        path: PathBuf,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the error reflects damaged data rather than an environment failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
