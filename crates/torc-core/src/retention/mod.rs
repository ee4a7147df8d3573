//! Retention sweep for expired run directories.
//!
//! The sweep is out-of-band and idempotent. It deletes whole run
//! directories strictly older than the retention window, never individual
//! artifacts: removing a single file would invalidate a surviving
//! manifest's internal self-consistency, while removing the whole
//! directory leaves every remaining manifest intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Names of the run directories that were deleted.
    pub deleted: Vec<String>,

    /// Number of run directories still inside the retention window.
    pub retained: usize,

    /// Entries that were skipped (symlinks, non-directories).
    pub skipped: Vec<String>,
}

/// Reasons a sweep refuses to run or aborts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetentionError {
    /// The runs root is not an absolute path.
    ///
    /// Deletion anchored to a relative path would depend on the process
    /// working directory; the sweep refuses the ambiguity.
    #[error("runs root must be absolute: {}", path.display())]
    NotAbsolute {
        /// The offending path.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("I/O failure during {context}: {source}")]
    Io {
        /// Which operation failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RetentionError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Deletes every run directory under `runs_root` whose last modification is
/// older than `retention_days` before `now`.
///
/// Symlinked entries are never followed or deleted; they are reported in
/// [`SweepOutcome::skipped`]. A missing runs root is a successful no-op.
///
/// # Errors
///
/// Returns [`RetentionError::NotAbsolute`] for a relative root, or an I/O
/// error if listing or deletion fails.
pub fn sweep_runs(
    runs_root: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, RetentionError> {
    if !runs_root.is_absolute() {
        return Err(RetentionError::NotAbsolute {
            path: runs_root.to_path_buf(),
        });
    }
    if !runs_root.exists() {
        return Ok(SweepOutcome::default());
    }

    let cutoff = now - Duration::days(i64::from(retention_days));
    let mut outcome = SweepOutcome::default();

    let entries = std::fs::read_dir(runs_root)
        .map_err(|e| RetentionError::io(format!("listing {}", runs_root.display()), e))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| RetentionError::io(format!("listing {}", runs_root.display()), e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let meta = std::fs::symlink_metadata(&path)
            .map_err(|e| RetentionError::io(format!("inspecting {}", path.display()), e))?;
        if meta.file_type().is_symlink() || !meta.is_dir() {
            warn!(entry = %name, "skipping non-directory entry in runs root");
            outcome.skipped.push(name);
            continue;
        }

        let modified = meta
            .modified()
            .map_err(|e| RetentionError::io(format!("reading mtime of {}", path.display()), e))?;
        if DateTime::<Utc>::from(modified) < cutoff {
            std::fs::remove_dir_all(&path)
                .map_err(|e| RetentionError::io(format!("deleting {}", path.display()), e))?;
            info!(run_dir = %name, "expired run directory deleted");
            outcome.deleted.push(name);
        } else {
            outcome.retained += 1;
        }
    }

    outcome.deleted.sort();
    Ok(outcome)
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;

    fn now() -> DateTime<Utc> {
        "2024-03-01T00:00:00Z".parse().unwrap()
    }

    fn make_run_dir(root: &Path, name: &str, age_days: i64) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("run_report_v1.json"), b"{}").unwrap();
        let mtime = now() - Duration::days(age_days);
        // Directory mtimes are what the sweep reads; set them explicitly so
        // the test does not depend on wall-clock age.
        let times = std::fs::FileTimes::new()
            .set_modified(std::time::SystemTime::from(mtime));
        let dir_handle = std::fs::File::open(&dir).unwrap();
        dir_handle.set_times(times).unwrap();
        dir
    }

    #[test]
    fn test_relative_root_refused() {
        let result = sweep_runs(Path::new("relative/runs"), 30, now());
        assert!(matches!(result, Err(RetentionError::NotAbsolute { .. })));
    }

    #[test]
    fn test_missing_root_is_noop() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("never-created");
        let outcome = sweep_runs(&missing, 30, now()).unwrap();
        assert_eq!(outcome, SweepOutcome::default());
    }

    #[test]
    fn test_deletes_only_expired_directories() {
        let root = TempDir::new().unwrap();
        let old = make_run_dir(root.path(), "run-old", 45);
        let fresh = make_run_dir(root.path(), "run-fresh", 5);

        let outcome = sweep_runs(root.path(), 30, now()).unwrap();

        assert_eq!(outcome.deleted, vec!["run-old".to_string()]);
        assert_eq!(outcome.retained, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        // The surviving directory keeps all of its artifacts.
        assert!(fresh.join("run_report_v1.json").is_file());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let root = TempDir::new().unwrap();
        make_run_dir(root.path(), "run-old", 45);

        let first = sweep_runs(root.path(), 30, now()).unwrap();
        assert_eq!(first.deleted.len(), 1);

        let second = sweep_runs(root.path(), 30, now()).unwrap();
        assert!(second.deleted.is_empty());
        assert_eq!(second.retained, 0);
    }

    #[test]
    fn test_symlinks_are_skipped() {
        let root = TempDir::new().unwrap();
        let target = make_run_dir(root.path(), "run-real", 45);

        #[cfg(unix)]
        {
            let link = root.path().join("run-link");
            std::os::unix::fs::symlink(&target, &link).unwrap();

            let outcome = sweep_runs(root.path(), 30, now()).unwrap();
            assert!(outcome.skipped.contains(&"run-link".to_string()));
            // The symlink itself survives; only the real directory was
            // eligible for deletion.
            assert!(link.symlink_metadata().is_ok());
        }
        let _ = target;
    }

    #[test]
    fn test_plain_files_in_root_are_skipped() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("stray.txt"), b"x").unwrap();

        let outcome = sweep_runs(root.path(), 30, now()).unwrap();
        assert_eq!(outcome.skipped, vec!["stray.txt".to_string()]);
    }
}
