//! Evidence and run-report integrity core for the torc ticket orchestrator.
//!
//! torc leases work items ("tickets") to workers and executes tool calls
//! against sandboxed adapters. This crate is the trust record of those runs:
//! it decides how raw tool/LLM output is classified, stored, truncated or
//! refused; assembles one terminal report per ticket execution; and seals
//! every run directory with an artifact manifest and a self-referential hash
//! so that an independent verifier can detect a single flipped byte in any
//! artifact, including the manifest itself.
//!
//! # Module map
//!
//! - [`determinism`]: canonical JSON encoding (the substrate for every
//!   structured-data hash) and crash-safe file writes.
//! - [`crypto`]: SHA-256 digest helpers for artifact content hashes.
//! - [`evidence`]: evidence classification, the [`evidence::EvidenceItem`]
//!   record and its validator, and the sandboxed raw-pointer grammar.
//! - [`report`]: pure assembly of the terminal [`report::RunReport`].
//! - [`manifest`]: the manifest writer (report, manifest, self-hash, in a
//!   fixed order) and the independent run-directory verifier.
//! - [`rejection`]: the narrow pre-authorized path that emits a minimal
//!   evidence bundle when a guard refuses a request before execution.
//! - [`limits`]: environment-overridable size/count/retention configuration.
//! - [`retention`]: the out-of-band sweep that deletes expired run
//!   directories whole, never individual artifacts.
//!
//! # Trust model
//!
//! Producers validate at the persistence boundary: an invalid item or
//! pointer never reaches the filesystem. Verifiers trust nothing: they
//! recompute every digest from the bytes on disk and recompute the manifest
//! self-hash with the two documented exclusions (the manifest's own hash is
//! absent by design; the self-hash artifact is excluded from the hash that
//! produced it).

#![forbid(unsafe_code)]

pub mod crypto;
pub mod determinism;
pub mod evidence;
pub mod limits;
pub mod manifest;
pub mod rejection;
pub mod report;
pub mod retention;

pub use evidence::{
    EvidenceClass, EvidenceItem, HashScope, ItemError, PointerError, StorageMode, build_pointer,
    classify, validate_item, validate_pointer,
};
pub use limits::Limits;
pub use manifest::{
    EvidenceManifest, ManifestArtifact, ManifestSelfHash, WrittenManifest, verify_run_dir,
    write_run,
};
pub use rejection::{RejectionCode, RejectionContext, RejectionEvidence, emit_rejection};
pub use report::{AttemptEvent, RunReport, RunStatus, StepReport, build_run_report};
pub use retention::sweep_runs;
