//! The manifest writer: the only path that persists a run.
//!
//! Writing a run report always emits the manifest and the self-hash in the
//! same call; there is no code path that can leave an orphaned report. The
//! filenames in [`super`] are referenced by no other writer in this crate
//! (a source-scan test enforces that), so nothing else can produce a
//! manifest file.
//!
//! The write order is a correctness requirement, not a convention: later
//! steps hash the output of earlier steps.
//!
//! 1. Write the run report.
//! 2. Enumerate every artifact file in the run directory (the report plus
//!    any raw evidence already materialized) and hash each one.
//! 3. Assemble the manifest, its own entry carrying null `sha256`/`bytes`.
//! 4. Write the manifest.
//! 5. Re-read it, apply the self-hash redactions, canonicalize, hash.
//! 6. Write the self-hash file.
//! 7. Follow-up pass: append the self-hash artifact entry to the manifest,
//!    rewrite it, then read everything back and confirm each recorded
//!    digest matches the bytes on disk.
//!
//! The follow-up rewrite cannot invalidate the self-hash because the
//! self-hash entry is excluded from its computation by construction.
//!
//! Any I/O failure is fatal to the run and surfaced as a write-failure
//! code; partial writes are not cleaned up. Operators rely on run-id
//! uniqueness to avoid reusing a half-written directory.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::{
    ARTIFACT_KIND_MANIFEST, ARTIFACT_KIND_RAW_EVIDENCE, ARTIFACT_KIND_RUN_REPORT,
    ARTIFACT_KIND_SELF_HASH, EvidenceManifest, MANIFEST_FILE, ManifestArtifact, ManifestSelfHash,
    RUN_REPORT_FILE, SELF_HASH_ALGORITHM, SELF_HASH_FILE,
};
use crate::crypto::sha256_file;
use crate::determinism::{AtomicWriteError, CanonicalJsonError, write_atomic};
use crate::evidence::{EVIDENCE_ROOT, PointerError, validate_pointer};
use crate::report::RunReport;

/// Paths produced by a successful [`write_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenManifest {
    /// Absolute path of the written manifest file.
    pub manifest_path: PathBuf,

    /// Absolute path of the written self-hash file.
    pub self_hash_path: PathBuf,
}

/// Reasons run persistence fails. All are fatal to the run's evidence
/// emission; none are retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// The run directory already holds a report, manifest, or self-hash.
    /// Run directories are write-once; a corrected run gets a new run id.
    #[error("run directory already contains {}", path.display())]
    AlreadyWritten {
        /// The pre-existing file.
        path: PathBuf,
    },

    /// A file in the run directory is neither a known artifact nor a valid
    /// raw evidence pointer path.
    #[error("unexpected file in run directory: {path}")]
    UnexpectedFile {
        /// Path relative to the run directory.
        path: String,
    },

    /// A raw evidence file's relative path failed pointer validation.
    #[error("raw evidence path rejected: {source}")]
    InvalidEvidencePath {
        /// The underlying pointer rejection.
        #[source]
        source: PointerError,
    },

    /// Serialization of the report, manifest, or self-hash failed.
    #[error("failed to serialize {what}: {message}")]
    Serialize {
        /// What was being serialized.
        what: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Canonicalization of the manifest failed.
    #[error("manifest canonicalization failed: {0}")]
    Canonical(#[from] CanonicalJsonError),

    /// An atomic write failed.
    #[error("artifact write failed: {0}")]
    Atomic(#[from] AtomicWriteError),

    /// A filesystem operation failed.
    #[error("I/O failure during {context}: {source}")]
    Io {
        /// Which operation failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The read-back pass found a mismatch between the manifest and disk.
    #[error("read-back verification failed for {path}: {detail}")]
    ReadBack {
        /// Path relative to the run directory.
        path: String,
        /// Description of the mismatch.
        detail: String,
    },
}

impl WriteError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyWritten { .. } => "write_already_written",
            Self::UnexpectedFile { .. } => "write_unexpected_file",
            Self::InvalidEvidencePath { .. } => "write_invalid_evidence_path",
            Self::Serialize { .. }
            | Self::Canonical(_)
            | Self::Atomic(_)
            | Self::Io { .. }
            | Self::ReadBack { .. } => "write_failed",
        }
    }

    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Persists a run report and seals its directory with manifest + self-hash.
///
/// # Errors
///
/// Returns [`WriteError`] on any failure; see the module docs for the
/// failure semantics.
pub fn write_run(
    run_dir: &Path,
    run_id: &str,
    report: &RunReport,
) -> Result<WrittenManifest, WriteError> {
    std::fs::create_dir_all(run_dir)
        .map_err(|e| WriteError::io(format!("creating run directory {}", run_dir.display()), e))?;

    for name in [RUN_REPORT_FILE, MANIFEST_FILE, SELF_HASH_FILE] {
        let path = run_dir.join(name);
        if path.exists() {
            return Err(WriteError::AlreadyWritten { path });
        }
    }

    // Step 1: the run report.
    let report_bytes = serde_json::to_vec_pretty(report).map_err(|e| WriteError::Serialize {
        what: "run report",
        message: e.to_string(),
    })?;
    write_atomic(&run_dir.join(RUN_REPORT_FILE), &report_bytes)?;
    debug!(run_id, "run report written");

    // Step 2: enumerate and hash everything present so far.
    let mut artifacts = enumerate_artifacts(run_dir)?;

    // Step 3: the manifest's own placeholder entry.
    artifacts.push(ManifestArtifact {
        kind: ARTIFACT_KIND_MANIFEST.into(),
        path: MANIFEST_FILE.into(),
        sha256: None,
        bytes: None,
    });
    let mut manifest = EvidenceManifest {
        run_id: run_id.to_string(),
        artifacts,
    };

    // Step 4: first manifest write.
    let manifest_path = run_dir.join(MANIFEST_FILE);
    write_manifest(&manifest_path, &manifest)?;

    // Step 5: self-hash over the just-written manifest, re-read from disk so
    // the hash input is exactly what a verifier will see.
    let on_disk = read_manifest(&manifest_path)?;
    let value = on_disk.compute_self_hash()?;

    // Step 6: the self-hash file.
    let self_hash = ManifestSelfHash {
        value,
        algorithm: SELF_HASH_ALGORITHM.into(),
    };
    let self_hash_bytes =
        serde_json::to_vec_pretty(&self_hash).map_err(|e| WriteError::Serialize {
            what: "self-hash",
            message: e.to_string(),
        })?;
    let self_hash_path = run_dir.join(SELF_HASH_FILE);
    write_atomic(&self_hash_path, &self_hash_bytes)?;

    // Step 7: follow-up pass recording the self-hash file as an artifact,
    // then full read-back confirmation.
    let (digest, len) = sha256_file(&self_hash_path)
        .map_err(|e| WriteError::io(format!("hashing {SELF_HASH_FILE}"), e))?;
    manifest.artifacts.push(ManifestArtifact {
        kind: ARTIFACT_KIND_SELF_HASH.into(),
        path: SELF_HASH_FILE.into(),
        sha256: Some(digest),
        bytes: Some(len),
    });
    write_manifest(&manifest_path, &manifest)?;

    confirm_read_back(run_dir, &manifest_path, &self_hash_path)?;

    info!(
        run_id,
        artifacts = manifest.artifacts.len(),
        "run evidence sealed"
    );
    Ok(WrittenManifest {
        manifest_path,
        self_hash_path,
    })
}

/// Lists and hashes every artifact file present in the run directory: the
/// run report plus raw evidence files under the sandbox root, sorted by
/// path so the manifest order is reproducible.
fn enumerate_artifacts(run_dir: &Path) -> Result<Vec<ManifestArtifact>, WriteError> {
    let mut artifacts = vec![hash_artifact(run_dir, ARTIFACT_KIND_RUN_REPORT, RUN_REPORT_FILE)?];

    let mut evidence_paths: Vec<String> = Vec::new();
    collect_files(run_dir, run_dir, &mut evidence_paths)?;
    evidence_paths.sort();

    for rel in evidence_paths {
        if rel == RUN_REPORT_FILE {
            continue;
        }
        if !rel.starts_with(EVIDENCE_ROOT) {
            return Err(WriteError::UnexpectedFile { path: rel });
        }
        // Every raw evidence path must itself be a valid sandbox pointer.
        validate_pointer(&rel).map_err(|source| WriteError::InvalidEvidencePath { source })?;
        artifacts.push(hash_artifact(run_dir, ARTIFACT_KIND_RAW_EVIDENCE, &rel)?);
    }
    Ok(artifacts)
}

/// Recursively collects relative POSIX paths of all regular files.
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<String>,
) -> Result<(), WriteError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| WriteError::io(format!("listing {}", dir.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| WriteError::io(format!("listing {}", dir.display()), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| WriteError::io(format!("inspecting {}", path.display()), e))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| WriteError::UnexpectedFile {
                    path: path.display().to_string(),
                })?;
            let rel = rel
                .to_str()
                .ok_or_else(|| WriteError::UnexpectedFile {
                    path: path.display().to_string(),
                })?
                .replace('\\', "/");
            out.push(rel);
        } else {
            // Symlinks and special files have no place in a run directory.
            return Err(WriteError::UnexpectedFile {
                path: path.display().to_string(),
            });
        }
    }
    Ok(())
}

/// Hashes one file and returns its manifest entry.
fn hash_artifact(
    run_dir: &Path,
    kind: &str,
    rel_path: &str,
) -> Result<ManifestArtifact, WriteError> {
    let (sha256, bytes) = sha256_file(&run_dir.join(rel_path))
        .map_err(|e| WriteError::io(format!("hashing {rel_path}"), e))?;
    Ok(ManifestArtifact {
        kind: kind.to_string(),
        path: rel_path.to_string(),
        sha256: Some(sha256),
        bytes: Some(bytes),
    })
}

fn write_manifest(path: &Path, manifest: &EvidenceManifest) -> Result<(), WriteError> {
    let bytes = serde_json::to_vec_pretty(manifest).map_err(|e| WriteError::Serialize {
        what: "manifest",
        message: e.to_string(),
    })?;
    write_atomic(path, &bytes)?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<EvidenceManifest, WriteError> {
    let bytes = std::fs::read(path)
        .map_err(|e| WriteError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&bytes).map_err(|e| WriteError::Serialize {
        what: "manifest read-back",
        message: e.to_string(),
    })
}

/// Closes the loop: re-reads manifest and self-hash from disk and confirms
/// every recorded digest, so a verifier reading only the manifest can
/// confirm every file using the two documented exceptions.
fn confirm_read_back(
    run_dir: &Path,
    manifest_path: &Path,
    self_hash_path: &Path,
) -> Result<(), WriteError> {
    let manifest = read_manifest(manifest_path)?;

    let self_hash_bytes = std::fs::read(self_hash_path)
        .map_err(|e| WriteError::io(format!("reading {SELF_HASH_FILE}"), e))?;
    let self_hash: ManifestSelfHash =
        serde_json::from_slice(&self_hash_bytes).map_err(|e| WriteError::Serialize {
            what: "self-hash read-back",
            message: e.to_string(),
        })?;

    let recomputed = manifest.compute_self_hash()?;
    if recomputed != self_hash.value {
        return Err(WriteError::ReadBack {
            path: SELF_HASH_FILE.into(),
            detail: format!(
                "self-hash mismatch: recomputed {recomputed}, stored {}",
                self_hash.value
            ),
        });
    }

    for artifact in &manifest.artifacts {
        if artifact.kind == ARTIFACT_KIND_MANIFEST {
            if artifact.sha256.is_some() || artifact.bytes.is_some() {
                return Err(WriteError::ReadBack {
                    path: artifact.path.clone(),
                    detail: "manifest's own entry must carry null sha256/bytes".into(),
                });
            }
            continue;
        }
        let (digest, len) = sha256_file(&run_dir.join(&artifact.path))
            .map_err(|e| WriteError::io(format!("re-hashing {}", artifact.path), e))?;
        if artifact.sha256.as_deref() != Some(digest.as_str())
            || artifact.bytes != Some(len)
        {
            return Err(WriteError::ReadBack {
                path: artifact.path.clone(),
                detail: "recorded sha256/bytes do not match the file on disk".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod unit_tests {
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::evidence::{EvidenceItem, build_pointer};
    use crate::limits::DEFAULT_LIMITS;
    use crate::report::{RunReportParams, RunStatus, StepReport, build_run_report};

    fn capture_time() -> DateTime<Utc> {
        "2024-01-15T10:30:00Z".parse().unwrap()
    }

    fn ok_report(evidence: Vec<EvidenceItem>) -> RunReport {
        build_run_report(
            RunReportParams {
                ticket_id: "tck-7".into(),
                status: RunStatus::Ok,
                primary_failure_code: None,
                started_at: "2024-01-15T10:30:00Z".into(),
                ended_at: "2024-01-15T10:31:00Z".into(),
                duration_ms: 60_000,
                steps: vec![StepReport {
                    step: "s1".into(),
                    tool: "adapter-shell".into(),
                    status: RunStatus::Ok,
                    failure_code: None,
                    duration_ms: 42,
                    evidence,
                }],
                attempts: vec![],
            },
            &DEFAULT_LIMITS,
        )
        .unwrap()
    }

    /// Materializes a raw evidence file in the run dir and returns its item.
    fn materialize_raw(run_dir: &Path, content: &[u8]) -> EvidenceItem {
        let pointer = build_pointer(&capture_time(), "probe_log").unwrap();
        let path = run_dir.join(&pointer);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        EvidenceItem::raw(
            "probe_log",
            "adapter-shell",
            &capture_time(),
            pointer,
            content.len() as u64,
            Some(content.len() as u64),
            false,
            crate::crypto::sha256_hex(content),
        )
    }

    #[test]
    fn test_write_produces_all_three_files() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-1");

        let written = write_run(&run_dir, "run-1", &ok_report(vec![])).unwrap();
        assert!(run_dir.join(RUN_REPORT_FILE).is_file());
        assert!(written.manifest_path.is_file());
        assert!(written.self_hash_path.is_file());
    }

    #[test]
    fn test_manifest_lists_raw_evidence() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-2");
        std::fs::create_dir_all(&run_dir).unwrap();
        let item = materialize_raw(&run_dir, b"probe output");
        let pointer = item.raw_pointer.clone().unwrap();

        write_run(&run_dir, "run-2", &ok_report(vec![item])).unwrap();

        let manifest = read_manifest(&run_dir.join(MANIFEST_FILE)).unwrap();
        let entry = manifest
            .artifacts
            .iter()
            .find(|a| a.path == pointer)
            .expect("raw evidence listed");
        assert_eq!(entry.kind, ARTIFACT_KIND_RAW_EVIDENCE);
        assert_eq!(entry.bytes, Some(12));
    }

    #[test]
    fn test_self_hash_round_trips() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-3");

        let written = write_run(&run_dir, "run-3", &ok_report(vec![])).unwrap();

        let manifest = read_manifest(&written.manifest_path).unwrap();
        let stored: ManifestSelfHash =
            serde_json::from_slice(&std::fs::read(&written.self_hash_path).unwrap()).unwrap();
        assert_eq!(manifest.compute_self_hash().unwrap(), stored.value);
        assert_eq!(stored.algorithm, SELF_HASH_ALGORITHM);
    }

    #[test]
    fn test_final_manifest_has_exactly_one_self_hash_entry() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-4");
        write_run(&run_dir, "run-4", &ok_report(vec![])).unwrap();

        let manifest = read_manifest(&run_dir.join(MANIFEST_FILE)).unwrap();
        let count = manifest
            .artifacts
            .iter()
            .filter(|a| a.kind == ARTIFACT_KIND_SELF_HASH)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rewrite_same_run_dir_rejected() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-5");
        write_run(&run_dir, "run-5", &ok_report(vec![])).unwrap();

        let err = write_run(&run_dir, "run-5", &ok_report(vec![])).unwrap_err();
        assert_eq!(err.code(), "write_already_written");
    }

    #[test]
    fn test_stray_file_outside_sandbox_rejected() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-6");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("notes.txt"), b"scratch").unwrap();

        let err = write_run(&run_dir, "run-6", &ok_report(vec![])).unwrap_err();
        assert_eq!(err.code(), "write_unexpected_file");
    }

    #[test]
    fn test_invalid_evidence_filename_rejected() {
        let root = TempDir::new().unwrap();
        let run_dir = root.path().join("run-7");
        let bad = run_dir.join(EVIDENCE_ROOT).join("2024-01-15");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("freeform.bin"), b"x").unwrap();

        let err = write_run(&run_dir, "run-7", &ok_report(vec![])).unwrap_err();
        assert_eq!(err.code(), "write_invalid_evidence_path");
    }
}
