//! Errors surfaced by snapshot persistence.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from a pluggable [`Codec`](crate::codec::Codec).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize: {0}")]
    Serialize(String),

    #[error("failed to deserialize: {0}")]
    Deserialize(String),
}

/// Errors from saving or restoring a snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Staging or installing a snapshot failed. The canonical location is unchanged.
    #[error("failed to write snapshot at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The rename target already exists. Never retried.
    #[error("snapshot target already exists: {path}")]
    TargetExists { path: PathBuf },

    /// A snapshot exists but could not be read from the filesystem.
    #[error("failed to read snapshot at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A snapshot exists but its contents are not a snapshot this version can decode.
    #[error("corrupt snapshot at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The in-memory state could not be encoded.
    #[error("failed to encode sub-state {sub_state}: {source}")]
    Encode {
        sub_state: String,
        #[source]
        source: CodecError,
    },
}

impl PersistError {
    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        Self::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// True for [`PersistError::Corrupt`].
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
