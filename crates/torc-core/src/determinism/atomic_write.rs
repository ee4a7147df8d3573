//! Crash-safe file writes.
//!
//! Artifact files are hashed after they are written, so a torn write would
//! poison every later step of manifest emission. `write_atomic` stages the
//! content in a temporary file in the target directory, syncs it, and
//! renames it into place: readers observe either the old state or the full
//! new content, never a prefix.

use std::io::Write as _;
use std::path::Path;

use thiserror::Error;

/// Errors that can occur during an atomic write.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AtomicWriteError {
    /// The target path has no parent directory to stage the write in.
    #[error("target path has no parent directory: {path}")]
    NoParent {
        /// The offending target path.
        path: String,
    },

    /// An I/O failure occurred during staging, sync, or rename.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Which phase of the write failed.
        context: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Writes `bytes` to `path` atomically.
///
/// The content is staged in a temporary file inside the same directory as
/// `path` (so the final rename never crosses a filesystem boundary), synced
/// to disk, and renamed over the target.
///
/// # Errors
///
/// Returns [`AtomicWriteError`] if the path has no parent or any I/O step
/// fails. On failure the target file is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AtomicWriteError> {
    let parent = path.parent().ok_or_else(|| AtomicWriteError::NoParent {
        path: path.display().to_string(),
    })?;

    let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(|source| {
        AtomicWriteError::Io {
            context: "creating staging file",
            source,
        }
    })?;
    staged
        .write_all(bytes)
        .map_err(|source| AtomicWriteError::Io {
            context: "writing staged content",
            source,
        })?;
    staged
        .as_file()
        .sync_all()
        .map_err(|source| AtomicWriteError::Io {
            context: "syncing staged content",
            source,
        })?;
    staged
        .persist(path)
        .map_err(|persist| AtomicWriteError::Io {
            context: "renaming staged file into place",
            source: persist.error,
        })?;
    Ok(())
}
