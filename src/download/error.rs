//! Failure taxonomy of the download pipeline

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::CatalogError;

/// Why a resolution or download did not produce a catalog entry
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Playlist or track metadata lookup failed; the item is skipped
    #[error("could not resolve {what}: {reason}")]
    Resolution { what: String, reason: String },

    /// Network or stream failure while fetching media; the entry is dropped
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The provider offered no audio-only opus stream
    #[error("no opus audio stream available")]
    NoOpusFormat,

    /// Directory or file creation failed for this download
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The download manager task has shut down
    #[error("download manager is not running")]
    Stopped,
}

impl DownloadError {
    pub fn resolution(what: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Resolution {
            what: what.into(),
            reason: format!("{:#}", err),
        }
    }

    pub fn transfer(err: anyhow::Error) -> Self {
        Self::Transfer(format!("{:#}", err))
    }

    pub fn filesystem(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}
