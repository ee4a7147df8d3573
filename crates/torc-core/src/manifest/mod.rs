//! Per-run artifact manifests and their self-referential hash.
//!
//! Every run directory is sealed by three files, written in this order and
//! only by [`writer::write_run`]:
//!
//! ```text
//! <run_dir>/run_report_v1.json
//! <run_dir>/evidence_manifest_v1.json
//! <run_dir>/manifest_self_hash_v1.json
//! ```
//!
//! The manifest lists every artifact in the directory with its SHA-256 and
//! byte length. Two entries are special, and both exceptions are part of
//! the verifier contract:
//!
//! - the manifest's **own** entry carries null `sha256`/`bytes`: a file
//!   cannot know its own hash before it is fully written, so the value is
//!   excluded rather than guessed;
//! - the **self-hash** artifact entry is removed before computing the
//!   self-hash, so a digest is never hashed into itself and recomputation
//!   is idempotent.
//!
//! The self-hash is the SHA-256 of the canonical JSON serialization of the
//! manifest with those two redactions applied. Any deviation from this
//! exclusion rule breaks verifier compatibility.

pub mod verify;
pub mod writer;

use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;
use crate::determinism::{CanonicalJsonError, canonical_bytes};

pub use verify::{IntegrityError, VerificationReport, verify_run_dir};
pub use writer::{WriteError, WrittenManifest, write_run};

/// Run report filename within a run directory.
pub const RUN_REPORT_FILE: &str = "run_report_v1.json";

/// Evidence manifest filename within a run directory.
pub const MANIFEST_FILE: &str = "evidence_manifest_v1.json";

/// Self-hash filename within a run directory.
pub const SELF_HASH_FILE: &str = "manifest_self_hash_v1.json";

/// Algorithm identifier recorded in the self-hash file.
pub const SELF_HASH_ALGORITHM: &str = "sha256-canonical-json";

/// Artifact kind of the run report file.
pub const ARTIFACT_KIND_RUN_REPORT: &str = "run_report_v1";

/// Artifact kind of the manifest file itself.
pub const ARTIFACT_KIND_MANIFEST: &str = "evidence_manifest_v1";

/// Artifact kind of the self-hash file.
pub const ARTIFACT_KIND_SELF_HASH: &str = "manifest_self_hash_v1";

/// Artifact kind of raw evidence files under the sandbox root.
pub const ARTIFACT_KIND_RAW_EVIDENCE: &str = "raw_evidence_v1";

/// One artifact listed in a run's evidence manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    /// Artifact kind, e.g. `run_report_v1` or `raw_evidence_v1`.
    pub kind: String,

    /// POSIX-style path relative to the run directory.
    pub path: String,

    /// Lowercase hex SHA-256 of the file content; null only for the
    /// manifest's own entry.
    pub sha256: Option<String>,

    /// File length in bytes; null only for the manifest's own entry.
    pub bytes: Option<u64>,
}

/// The ordered artifact list of one run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceManifest {
    /// The run this manifest seals.
    pub run_id: String,

    /// Every artifact in the run directory, in a fixed order: the run
    /// report, raw evidence sorted by path, the manifest itself, then the
    /// self-hash file.
    pub artifacts: Vec<ManifestArtifact>,
}

impl EvidenceManifest {
    /// Returns the manifest with the two self-hash redactions applied:
    /// self-hash artifact entries removed, the manifest's own entry's
    /// `sha256`/`bytes` nulled.
    ///
    /// Applying this to an already-redacted manifest changes nothing, which
    /// is what makes self-hash recomputation idempotent.
    #[must_use]
    pub fn self_hash_input(&self) -> Self {
        let artifacts = self
            .artifacts
            .iter()
            .filter(|artifact| artifact.kind != ARTIFACT_KIND_SELF_HASH)
            .map(|artifact| {
                if artifact.kind == ARTIFACT_KIND_MANIFEST {
                    ManifestArtifact {
                        sha256: None,
                        bytes: None,
                        ..artifact.clone()
                    }
                } else {
                    artifact.clone()
                }
            })
            .collect();
        Self {
            run_id: self.run_id.clone(),
            artifacts,
        }
    }

    /// Computes the manifest self-hash: SHA-256 over the canonical JSON
    /// bytes of [`Self::self_hash_input`].
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalJsonError`] if the manifest cannot be canonically
    /// serialized.
    pub fn compute_self_hash(&self) -> Result<String, CanonicalJsonError> {
        let bytes = canonical_bytes(&self.self_hash_input())?;
        Ok(sha256_hex(&bytes))
    }
}

/// The digest stored in `manifest_self_hash_v1.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSelfHash {
    /// Lowercase hex SHA-256 over the redacted, canonicalized manifest.
    pub value: String,

    /// Always [`SELF_HASH_ALGORITHM`].
    pub algorithm: String,
}
