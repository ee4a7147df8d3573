//! Independent run-directory verification.
//!
//! A verifier trusts nothing the producer wrote: it re-reads the manifest,
//! recomputes every artifact digest from the bytes on disk, recomputes the
//! self-hash with the documented exclusions, and cross-checks the raw
//! pointers referenced by the run report against the manifest. Producers
//! reject invalid data before it reaches disk; the violations reported here
//! mean the directory changed after it was sealed, or the manifest was
//! never valid.
//!
//! The subsystem deliberately does not "heal" a broken run: a directory
//! whose manifest fails verification is itself the signal.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    ARTIFACT_KIND_MANIFEST, ARTIFACT_KIND_SELF_HASH, EvidenceManifest, MANIFEST_FILE,
    ManifestSelfHash, RUN_REPORT_FILE, SELF_HASH_ALGORITHM, SELF_HASH_FILE,
};
use crate::crypto::{is_sha256_hex, sha256_file};
use crate::evidence::{EVIDENCE_ROOT, StorageMode, validate_pointer};
use crate::report::RunReport;

/// Integrity violations a verifier can detect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IntegrityError {
    /// An artifact listed in the manifest is missing from disk.
    #[error("missing artifact: {path}")]
    MissingArtifact {
        /// The missing path, relative to the run directory.
        path: String,
    },

    /// An artifact's recorded byte length does not match the file on disk.
    #[error("byte length mismatch for {path}: recorded {recorded}, on disk {actual}")]
    ByteMismatch {
        /// The artifact path.
        path: String,
        /// The length recorded in the manifest.
        recorded: u64,
        /// The length found on disk.
        actual: u64,
    },

    /// An artifact's recorded hash does not match the file on disk.
    #[error("hash mismatch for {path}: recorded {recorded}, on disk {actual}")]
    HashMismatch {
        /// The artifact path.
        path: String,
        /// The hash recorded in the manifest.
        recorded: String,
        /// The hash computed from disk.
        actual: String,
    },

    /// The manifest violates its own schema.
    #[error("manifest schema invalid: {detail}")]
    SchemaInvalid {
        /// Which schema rule was broken.
        detail: String,
    },

    /// A raw evidence file or report pointer is not listed in the manifest.
    #[error("pointer not listed in manifest: {path}")]
    UnlistedPointer {
        /// The unlisted path.
        path: String,
    },

    /// The recomputed self-hash does not match the stored value.
    #[error("self-hash mismatch: recomputed {recomputed}, stored {stored}")]
    SelfHashMismatch {
        /// The hash recomputed from the manifest on disk.
        recomputed: String,
        /// The hash stored in the self-hash file.
        stored: String,
    },

    /// The same path appears more than once in the manifest.
    #[error("duplicate artifact path: {path}")]
    DuplicatePath {
        /// The duplicated path.
        path: String,
    },

    /// The verifier attempted to register the same check name twice.
    #[error("duplicate check name: {name}")]
    DuplicateCheck {
        /// The duplicated check name.
        name: String,
    },

    /// A file needed for verification could not be read.
    #[error("I/O failure during {context}: {message}")]
    Io {
        /// Which operation failed.
        context: String,
        /// Description of the I/O error.
        message: String,
    },
}

impl IntegrityError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingArtifact { .. } => "integrity_missing_artifact",
            Self::ByteMismatch { .. } => "integrity_byte_mismatch",
            Self::HashMismatch { .. } => "integrity_hash_mismatch",
            Self::SchemaInvalid { .. } => "integrity_schema_invalid",
            Self::UnlistedPointer { .. } => "integrity_unlisted_pointer",
            Self::SelfHashMismatch { .. } => "integrity_self_hash_mismatch",
            Self::DuplicatePath { .. } => "integrity_duplicate_path",
            Self::DuplicateCheck { .. } => "integrity_duplicate_check",
            Self::Io { .. } => "integrity_io",
        }
    }
}

/// Outcome of one named verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name, unique within a report.
    pub name: String,

    /// Whether the check passed.
    pub passed: bool,
}

/// The full result of verifying one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// The run id recorded in the manifest.
    pub run_id: String,

    /// Every check that ran, in order.
    pub checks: Vec<CheckResult>,

    /// Every violation found; empty for an intact directory.
    pub violations: Vec<IntegrityError>,
}

impl VerificationReport {
    /// Whether the directory verified clean.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Accumulates named checks, refusing duplicates.
struct CheckRegistry {
    checks: Vec<CheckResult>,
    violations: Vec<IntegrityError>,
}

impl CheckRegistry {
    fn new() -> Self {
        Self {
            checks: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Records a check outcome; a repeated name is itself a violation.
    fn record(&mut self, name: &str, found: Vec<IntegrityError>) {
        if self.checks.iter().any(|c| c.name == name) {
            self.violations.push(IntegrityError::DuplicateCheck {
                name: name.to_string(),
            });
            return;
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed: found.is_empty(),
        });
        self.violations.extend(found);
    }
}

/// Verifies one sealed run directory.
///
/// # Errors
///
/// Returns [`IntegrityError`] only when the manifest itself cannot be read
/// or parsed; every other finding is reported as a violation inside the
/// [`VerificationReport`] so one broken artifact does not mask another.
pub fn verify_run_dir(run_dir: &Path) -> Result<VerificationReport, IntegrityError> {
    let manifest_path = run_dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(IntegrityError::MissingArtifact {
            path: MANIFEST_FILE.into(),
        });
    }
    let bytes = std::fs::read(&manifest_path).map_err(|e| IntegrityError::Io {
        context: format!("reading {MANIFEST_FILE}"),
        message: e.to_string(),
    })?;
    let manifest: EvidenceManifest =
        serde_json::from_slice(&bytes).map_err(|e| IntegrityError::SchemaInvalid {
            detail: format!("manifest is not parseable: {e}"),
        })?;

    let mut registry = CheckRegistry::new();
    registry.record("manifest_schema", check_schema(&manifest));
    registry.record("path_uniqueness", check_path_uniqueness(&manifest));
    registry.record("artifact_bytes", check_artifacts(run_dir, &manifest));
    registry.record("self_hash", check_self_hash(run_dir, &manifest));
    registry.record("pointer_coverage", check_pointer_coverage(run_dir, &manifest));

    Ok(VerificationReport {
        run_id: manifest.run_id,
        checks: registry.checks,
        violations: registry.violations,
    })
}

/// Schema rules the final manifest must satisfy.
fn check_schema(manifest: &EvidenceManifest) -> Vec<IntegrityError> {
    let mut found = Vec::new();

    let manifest_entries: Vec<_> = manifest
        .artifacts
        .iter()
        .filter(|a| a.kind == ARTIFACT_KIND_MANIFEST)
        .collect();
    if manifest_entries.len() != 1 {
        found.push(IntegrityError::SchemaInvalid {
            detail: format!(
                "expected exactly one {ARTIFACT_KIND_MANIFEST} entry, found {}",
                manifest_entries.len()
            ),
        });
    }
    for entry in &manifest_entries {
        if entry.sha256.is_some() || entry.bytes.is_some() {
            found.push(IntegrityError::SchemaInvalid {
                detail: "the manifest's own entry must carry null sha256/bytes".into(),
            });
        }
    }

    let self_hash_entries = manifest
        .artifacts
        .iter()
        .filter(|a| a.kind == ARTIFACT_KIND_SELF_HASH)
        .count();
    if self_hash_entries != 1 {
        found.push(IntegrityError::SchemaInvalid {
            detail: format!(
                "expected exactly one {ARTIFACT_KIND_SELF_HASH} entry, found {self_hash_entries}"
            ),
        });
    }

    for artifact in &manifest.artifacts {
        if artifact.kind.is_empty() {
            found.push(IntegrityError::SchemaInvalid {
                detail: format!("artifact '{}' has an empty kind", artifact.path),
            });
        }
        if artifact.path.is_empty()
            || artifact.path.starts_with('/')
            || artifact.path.contains('\\')
            || artifact.path.split('/').any(|s| s == "." || s == "..")
        {
            found.push(IntegrityError::SchemaInvalid {
                detail: format!("artifact path '{}' is not run-dir-relative", artifact.path),
            });
        }
        if artifact.kind != ARTIFACT_KIND_MANIFEST {
            match &artifact.sha256 {
                Some(hash) if is_sha256_hex(hash) => {},
                _ => found.push(IntegrityError::SchemaInvalid {
                    detail: format!(
                        "artifact '{}' must carry a hex sha256",
                        artifact.path
                    ),
                }),
            }
        }
    }
    found
}

fn check_path_uniqueness(manifest: &EvidenceManifest) -> Vec<IntegrityError> {
    let mut seen = BTreeSet::new();
    let mut found = Vec::new();
    for artifact in &manifest.artifacts {
        if !seen.insert(artifact.path.as_str()) {
            found.push(IntegrityError::DuplicatePath {
                path: artifact.path.clone(),
            });
        }
    }
    found
}

/// Byte-exactness: every listed artifact except the manifest's own entry
/// must match its recorded hash and length.
fn check_artifacts(run_dir: &Path, manifest: &EvidenceManifest) -> Vec<IntegrityError> {
    let mut found = Vec::new();
    for artifact in &manifest.artifacts {
        if artifact.kind == ARTIFACT_KIND_MANIFEST {
            continue;
        }
        let path = run_dir.join(&artifact.path);
        if !path.is_file() {
            found.push(IntegrityError::MissingArtifact {
                path: artifact.path.clone(),
            });
            continue;
        }
        let (actual_hash, actual_len) = match sha256_file(&path) {
            Ok(pair) => pair,
            Err(e) => {
                found.push(IntegrityError::Io {
                    context: format!("hashing {}", artifact.path),
                    message: e.to_string(),
                });
                continue;
            },
        };
        if let Some(recorded) = artifact.bytes {
            if recorded != actual_len {
                found.push(IntegrityError::ByteMismatch {
                    path: artifact.path.clone(),
                    recorded,
                    actual: actual_len,
                });
            }
        }
        if let Some(recorded) = &artifact.sha256 {
            if *recorded != actual_hash {
                found.push(IntegrityError::HashMismatch {
                    path: artifact.path.clone(),
                    recorded: recorded.clone(),
                    actual: actual_hash,
                });
            }
        }
    }
    found
}

/// Recomputes the self-hash from the manifest on disk and compares it to
/// the stored value.
fn check_self_hash(run_dir: &Path, manifest: &EvidenceManifest) -> Vec<IntegrityError> {
    let path = run_dir.join(SELF_HASH_FILE);
    if !path.is_file() {
        return vec![IntegrityError::MissingArtifact {
            path: SELF_HASH_FILE.into(),
        }];
    }
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return vec![IntegrityError::Io {
                context: format!("reading {SELF_HASH_FILE}"),
                message: e.to_string(),
            }];
        },
    };
    let stored: ManifestSelfHash = match serde_json::from_slice(&bytes) {
        Ok(stored) => stored,
        Err(e) => {
            return vec![IntegrityError::SchemaInvalid {
                detail: format!("self-hash file is not parseable: {e}"),
            }];
        },
    };

    let mut found = Vec::new();
    if stored.algorithm != SELF_HASH_ALGORITHM {
        found.push(IntegrityError::SchemaInvalid {
            detail: format!("unsupported self-hash algorithm '{}'", stored.algorithm),
        });
        return found;
    }
    match manifest.compute_self_hash() {
        Ok(recomputed) => {
            if recomputed != stored.value {
                found.push(IntegrityError::SelfHashMismatch {
                    recomputed,
                    stored: stored.value,
                });
            }
        },
        Err(e) => found.push(IntegrityError::SchemaInvalid {
            detail: format!("manifest cannot be canonicalized: {e}"),
        }),
    }
    found
}

/// Every raw evidence file on disk, and every raw pointer referenced by the
/// run report, must be listed in the manifest.
fn check_pointer_coverage(run_dir: &Path, manifest: &EvidenceManifest) -> Vec<IntegrityError> {
    let listed: BTreeSet<&str> = manifest
        .artifacts
        .iter()
        .map(|a| a.path.as_str())
        .collect();
    let mut found = Vec::new();

    // Files on disk under the sandbox root.
    let mut on_disk = Vec::new();
    collect_evidence_files(run_dir, &run_dir.join(EVIDENCE_ROOT), &mut on_disk);
    for rel in on_disk {
        if !listed.contains(rel.as_str()) {
            found.push(IntegrityError::UnlistedPointer { path: rel });
        }
    }

    // Pointers referenced by the report.
    let report_path = run_dir.join(RUN_REPORT_FILE);
    if let Ok(bytes) = std::fs::read(&report_path) {
        if let Ok(report) = serde_json::from_slice::<RunReport>(&bytes) {
            for step in &report.steps {
                for item in &step.evidence {
                    if item.storage != StorageMode::Raw {
                        continue;
                    }
                    if let Some(pointer) = &item.raw_pointer {
                        if validate_pointer(pointer).is_ok() && !listed.contains(pointer.as_str())
                        {
                            found.push(IntegrityError::UnlistedPointer {
                                path: pointer.clone(),
                            });
                        }
                    }
                }
            }
        }
    }
    found
}

/// Best-effort recursive listing of the sandbox subtree; unreadable entries
/// are skipped (their absence will surface through other checks).
fn collect_evidence_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_evidence_files(root, &path, out);
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                if let Some(rel) = rel.to_str() {
                    out.push(rel.replace('\\', "/"));
                }
            }
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_check_registry_refuses_duplicate_names() {
        let mut registry = CheckRegistry::new();
        registry.record("artifact_bytes", vec![]);
        registry.record("artifact_bytes", vec![]);

        assert_eq!(registry.checks.len(), 1);
        assert_eq!(registry.violations.len(), 1);
        assert_eq!(
            registry.violations[0].code(),
            "integrity_duplicate_check"
        );
    }

    #[test]
    fn test_duplicate_paths_detected() {
        let manifest = EvidenceManifest {
            run_id: "r".into(),
            artifacts: vec![
                super::super::ManifestArtifact {
                    kind: "run_report_v1".into(),
                    path: "run_report_v1.json".into(),
                    sha256: Some("a".repeat(64)),
                    bytes: Some(1),
                },
                super::super::ManifestArtifact {
                    kind: "raw_evidence_v1".into(),
                    path: "run_report_v1.json".into(),
                    sha256: Some("b".repeat(64)),
                    bytes: Some(2),
                },
            ],
        };
        let found = check_path_uniqueness(&manifest);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code(), "integrity_duplicate_path");
    }

    #[test]
    fn test_schema_rejects_hashed_manifest_entry() {
        let manifest = EvidenceManifest {
            run_id: "r".into(),
            artifacts: vec![
                super::super::ManifestArtifact {
                    kind: ARTIFACT_KIND_MANIFEST.into(),
                    path: MANIFEST_FILE.into(),
                    sha256: Some("a".repeat(64)),
                    bytes: None,
                },
                super::super::ManifestArtifact {
                    kind: ARTIFACT_KIND_SELF_HASH.into(),
                    path: SELF_HASH_FILE.into(),
                    sha256: Some("b".repeat(64)),
                    bytes: Some(1),
                },
            ],
        };
        let found = check_schema(&manifest);
        assert!(
            found
                .iter()
                .any(|v| v.code() == "integrity_schema_invalid")
        );
    }

    #[test]
    fn test_schema_rejects_non_relative_paths() {
        let manifest = EvidenceManifest {
            run_id: "r".into(),
            artifacts: vec![
                super::super::ManifestArtifact {
                    kind: ARTIFACT_KIND_MANIFEST.into(),
                    path: MANIFEST_FILE.into(),
                    sha256: None,
                    bytes: None,
                },
                super::super::ManifestArtifact {
                    kind: ARTIFACT_KIND_SELF_HASH.into(),
                    path: SELF_HASH_FILE.into(),
                    sha256: Some("b".repeat(64)),
                    bytes: Some(1),
                },
                super::super::ManifestArtifact {
                    kind: "raw_evidence_v1".into(),
                    path: "evidence_store/../../etc/passwd".into(),
                    sha256: Some("c".repeat(64)),
                    bytes: Some(1),
                },
            ],
        };
        let found = check_schema(&manifest);
        assert!(found.iter().any(
            |v| matches!(v, IntegrityError::SchemaInvalid { detail } if detail.contains("passwd"))
        ));
    }
}
