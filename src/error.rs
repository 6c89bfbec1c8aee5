//! The error type returned by the vendoring pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VendorError {
    #[error(
        "Only one of a source directory ({}) or a source archive ({archive}) may be given",
        .directory.display()
    )]
    ConflictingSources { directory: PathBuf, archive: String },

    #[error("No source archive matches `{pattern}`")]
    ArchiveNotFound { pattern: String },

    #[error("Manifest not found: {reason}")]
    ManifestNotFound { reason: String },

    #[error(
        "Expected exactly one top-level directory in {}, found {entries} top-level entries",
        .archive.display()
    )]
    SourceLayout { archive: PathBuf, entries: usize },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VendorError {
    pub(crate) fn manifest_not_found<S: Into<String>>(reason: S) -> Self {
        VendorError::ManifestNotFound {
            reason: reason.into(),
        }
    }
}
