//! Guard rejection evidence.
//!
//! When a guard refuses a request before normal execution evidence exists
//! (a lease ownership mismatch, an expired lease), this module emits a
//! minimal but fully auditable evidence bundle through the same manifest
//! writer as successful runs.
//!
//! The path is narrow and pre-authorized: only codes on the fixed
//! [`RejectionCode`] allow-list are accepted (unknown codes fail closed
//! rather than producing ad hoc evidence shapes), and the debug payload is
//! schema-locked. Sensitive tokens never appear in it; only their SHA-256
//! digests do, alongside the expected and provided lease owner identifiers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::crypto::sha256_hex;
use crate::determinism::{AtomicWriteError, write_atomic};
use crate::evidence::{EvidenceItem, PointerError, assert_item_valid, build_pointer};
use crate::limits::Limits;
use crate::manifest::{WriteError, write_run};
use crate::report::{ReportError, RunReportParams, RunStatus, StepReport, build_run_report};

/// Schema identifier of the debug payload.
pub const GUARD_REJECTION_SCHEMA: &str = "guard_rejection_debug.v1";

/// Evidence kind under which the debug payload is stored.
const GUARD_REJECTION_KIND: &str = "guard_rejection";

/// The fixed allow-list of guard rejection codes.
///
/// Adding a code here is a reviewed governance change; there is no runtime
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    /// The caller holds a lease, but not the one recorded for the ticket.
    LeaseOwnershipMismatch,

    /// The caller's lease expired before the request arrived.
    LeaseExpired,

    /// The request carried no lease at all.
    LeaseMissing,

    /// The ticket does not exist.
    TicketNotFound,

    /// The orchestrator's current mode forbids this operation.
    ModeForbidden,
}

impl RejectionCode {
    /// Parses a stable code string, failing closed on anything unknown.
    ///
    /// # Errors
    ///
    /// Returns [`RejectionError::UnknownCode`] for any string not on the
    /// allow-list.
    pub fn parse(value: &str) -> Result<Self, RejectionError> {
        match value {
            "lease_ownership_mismatch" => Ok(Self::LeaseOwnershipMismatch),
            "lease_expired" => Ok(Self::LeaseExpired),
            "lease_missing" => Ok(Self::LeaseMissing),
            "ticket_not_found" => Ok(Self::TicketNotFound),
            "mode_forbidden" => Ok(Self::ModeForbidden),
            _ => Err(RejectionError::UnknownCode {
                value: value.to_string(),
            }),
        }
    }

    /// Returns the canonical string form of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseOwnershipMismatch => "lease_ownership_mismatch",
            Self::LeaseExpired => "lease_expired",
            Self::LeaseMissing => "lease_missing",
            Self::TicketNotFound => "ticket_not_found",
            Self::ModeForbidden => "mode_forbidden",
        }
    }
}

/// HTTP context of the rejected request.
///
/// The `authorization` value is consumed only to derive a digest; it is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpContext {
    /// Request method.
    pub method: String,

    /// Request path.
    pub path: String,

    /// Correlation id, when the caller supplied one.
    pub request_id: Option<String>,

    /// Raw authorization value, if any. Hashed, never stored.
    pub authorization: Option<String>,
}

/// One side of a lease comparison.
///
/// The `token` is the sensitive proof of ownership; only its digest is
/// persisted. The `owner` is an identifier and is stored as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseClaim {
    /// Lease owner identifier.
    pub owner: String,

    /// Raw lease token, if any. Hashed, never stored.
    pub token: Option<String>,
}

/// Snapshot of the orchestrator mode at rejection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSnapshot {
    /// Operating mode label (e.g. `enforce`, `observe`).
    pub mode: String,

    /// Whether the orchestrator was running dry.
    pub dry_run: bool,
}

/// Everything the guard layer knows about a rejected request.
#[derive(Debug, Clone)]
pub struct RejectionContext {
    /// The ticket the request addressed.
    pub ticket_id: String,

    /// The ticket's kind label.
    pub ticket_kind: String,

    /// HTTP context of the rejected request.
    pub http: HttpContext,

    /// The lease the orchestrator expected.
    pub lease_expected: LeaseClaim,

    /// The lease the caller provided.
    pub lease_provided: LeaseClaim,

    /// Orchestrator mode at rejection time.
    pub mode: ModeSnapshot,

    /// When the guard fired.
    pub occurred_at: DateTime<Utc>,
}

/// The schema-locked debug payload persisted for a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardRejectionDebugV1 {
    /// Always [`GUARD_REJECTION_SCHEMA`].
    pub schema: String,

    /// The ticket the request addressed.
    pub ticket_id: String,

    /// The ticket's kind label.
    pub ticket_kind: String,

    /// The rejection code.
    pub code: String,

    /// Request method.
    pub http_method: String,

    /// Request path.
    pub http_path: String,

    /// Correlation id, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request_id: Option<String>,

    /// SHA-256 of the authorization value, when one was presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_sha256: Option<String>,

    /// Expected lease owner identifier.
    pub lease_expected_owner: String,

    /// SHA-256 of the expected lease token, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expected_token_sha256: Option<String>,

    /// Provided lease owner identifier.
    pub lease_provided_owner: String,

    /// SHA-256 of the provided lease token, when one was presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_provided_token_sha256: Option<String>,

    /// Orchestrator mode at rejection time.
    pub mode: ModeSnapshot,

    /// When the guard fired, RFC 3339.
    pub occurred_at: String,
}

/// Locations of an emitted rejection bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionEvidence {
    /// The synthetic run id under which the rejection was recorded.
    pub evidence_run_id: String,

    /// The sealed run directory.
    pub run_dir: PathBuf,

    /// Absolute path of the materialized debug payload.
    pub debug_path: PathBuf,
}

/// Reasons rejection evidence emission fails.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RejectionError {
    /// The stable code is not on the allow-list.
    #[error("unknown guard rejection code: '{value}'")]
    UnknownCode {
        /// The unrecognized value.
        value: String,
    },

    /// The debug payload could not be serialized.
    #[error("failed to serialize debug payload: {message}")]
    Serialize {
        /// Description of the failure.
        message: String,
    },

    /// Building the evidence pointer failed.
    #[error("failed to build evidence pointer: {0}")]
    Pointer(#[from] PointerError),

    /// Materializing the debug payload failed.
    #[error("failed to write debug payload: {0}")]
    Write(#[from] AtomicWriteError),

    /// A filesystem operation failed.
    #[error("I/O failure during {context}: {source}")]
    Io {
        /// Which operation failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Report assembly failed.
    #[error("failed to assemble rejection report: {0}")]
    Report(#[from] ReportError),

    /// Sealing the run directory failed.
    #[error("failed to seal rejection evidence: {0}")]
    Seal(#[from] WriteError),
}

impl RejectionError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownCode { .. } => "rejection_unknown_code",
            Self::Serialize { .. }
            | Self::Pointer(_)
            | Self::Write(_)
            | Self::Io { .. }
            | Self::Report(_)
            | Self::Seal(_) => "rejection_emit_failed",
        }
    }
}

/// Emits the evidence bundle for a guard-rejected request.
///
/// `stable_code` must be on the [`RejectionCode`] allow-list. The debug
/// payload is materialized as a raw evidence file, embedded in a minimal
/// blocked-status run report, and sealed through the manifest writer, so a
/// rejected run is exactly as auditable as a successful one.
///
/// # Errors
///
/// Returns [`RejectionError::UnknownCode`] for a code off the allow-list,
/// or the underlying failure if any persistence step fails.
pub fn emit_rejection(
    runs_root: &Path,
    stable_code: &str,
    ctx: &RejectionContext,
    limits: &Limits,
) -> Result<RejectionEvidence, RejectionError> {
    let code = RejectionCode::parse(stable_code)?;

    let evidence_run_id = format!("rejection-{}", Uuid::new_v4());
    let run_dir = runs_root.join(&evidence_run_id);

    let payload = debug_payload(code, ctx);
    let payload_bytes =
        serde_json::to_vec_pretty(&payload).map_err(|e| RejectionError::Serialize {
            message: e.to_string(),
        })?;

    let pointer = build_pointer(&ctx.occurred_at, GUARD_REJECTION_KIND)?;
    let debug_path = run_dir.join(&pointer);
    if let Some(parent) = debug_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RejectionError::Io {
            context: format!("creating {}", parent.display()),
            source,
        })?;
    }
    write_atomic(&debug_path, &payload_bytes)?;

    let item = EvidenceItem::raw(
        GUARD_REJECTION_KIND,
        "guard",
        &ctx.occurred_at,
        pointer,
        payload_bytes.len() as u64,
        Some(payload_bytes.len() as u64),
        false,
        sha256_hex(&payload_bytes),
    );
    // This item was built here, from validated parts; a failure is a bug in
    // this function, not in the caller's input.
    assert_item_valid(&item);

    let occurred = ctx.occurred_at.to_rfc3339();
    let report = build_run_report(
        RunReportParams {
            ticket_id: ctx.ticket_id.clone(),
            status: RunStatus::Blocked,
            primary_failure_code: Some(code.as_str().to_string()),
            started_at: occurred.clone(),
            ended_at: occurred.clone(),
            duration_ms: 0,
            steps: vec![StepReport {
                step: "guard".into(),
                tool: "guard".into(),
                status: RunStatus::Blocked,
                failure_code: Some(code.as_str().to_string()),
                duration_ms: 0,
                evidence: vec![item],
            }],
            attempts: vec![],
        },
        limits,
    )?;

    write_run(&run_dir, &evidence_run_id, &report)?;

    info!(
        ticket_id = %ctx.ticket_id,
        code = code.as_str(),
        run_id = %evidence_run_id,
        "guard rejection evidence emitted"
    );
    Ok(RejectionEvidence {
        evidence_run_id,
        run_dir,
        debug_path,
    })
}

/// Builds the schema-locked payload, hashing every sensitive token.
fn debug_payload(code: RejectionCode, ctx: &RejectionContext) -> GuardRejectionDebugV1 {
    let hash_token = |token: &Option<String>| {
        token
            .as_ref()
            .map(|t| sha256_hex(t.as_bytes()))
    };

    GuardRejectionDebugV1 {
        schema: GUARD_REJECTION_SCHEMA.into(),
        ticket_id: ctx.ticket_id.clone(),
        ticket_kind: ctx.ticket_kind.clone(),
        code: code.as_str().into(),
        http_method: ctx.http.method.clone(),
        http_path: ctx.http.path.clone(),
        http_request_id: ctx.http.request_id.clone(),
        authorization_sha256: hash_token(&ctx.http.authorization),
        lease_expected_owner: ctx.lease_expected.owner.clone(),
        lease_expected_token_sha256: hash_token(&ctx.lease_expected.token),
        lease_provided_owner: ctx.lease_provided.owner.clone(),
        lease_provided_token_sha256: hash_token(&ctx.lease_provided.token),
        mode: ctx.mode.clone(),
        occurred_at: ctx.occurred_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod unit_tests {
    use tempfile::TempDir;

    use super::*;
    use crate::limits::DEFAULT_LIMITS;
    use crate::manifest::{MANIFEST_FILE, RUN_REPORT_FILE, SELF_HASH_FILE, verify_run_dir};

    fn context() -> RejectionContext {
        RejectionContext {
            ticket_id: "tck-99".into(),
            ticket_kind: "code_change".into(),
            http: HttpContext {
                method: "POST".into(),
                path: "/tickets/tck-99/steps".into(),
                request_id: Some("req-123".into()),
                authorization: Some("Bearer super-secret-token".into()),
            },
            lease_expected: LeaseClaim {
                owner: "worker-a".into(),
                token: Some("expected-lease-token".into()),
            },
            lease_provided: LeaseClaim {
                owner: "worker-b".into(),
                token: Some("provided-lease-token".into()),
            },
            mode: ModeSnapshot {
                mode: "enforce".into(),
                dry_run: false,
            },
            occurred_at: "2024-01-15T10:30:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_code_parse_round_trip() {
        for code in [
            RejectionCode::LeaseOwnershipMismatch,
            RejectionCode::LeaseExpired,
            RejectionCode::LeaseMissing,
            RejectionCode::TicketNotFound,
            RejectionCode::ModeForbidden,
        ] {
            assert_eq!(RejectionCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn test_unknown_code_fails_closed() {
        let root = TempDir::new().unwrap();
        let err = emit_rejection(root.path(), "novel_code", &context(), &DEFAULT_LIMITS)
            .unwrap_err();
        assert_eq!(err.code(), "rejection_unknown_code");
        // Nothing was written.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_emit_seals_a_verifiable_run() {
        let root = TempDir::new().unwrap();
        let evidence = emit_rejection(
            root.path(),
            "lease_ownership_mismatch",
            &context(),
            &DEFAULT_LIMITS,
        )
        .unwrap();

        assert!(evidence.run_dir.join(RUN_REPORT_FILE).is_file());
        assert!(evidence.run_dir.join(MANIFEST_FILE).is_file());
        assert!(evidence.run_dir.join(SELF_HASH_FILE).is_file());
        assert!(evidence.debug_path.is_file());

        let verification = verify_run_dir(&evidence.run_dir).unwrap();
        assert!(verification.is_clean(), "{:?}", verification.violations);
        assert_eq!(verification.run_id, evidence.evidence_run_id);
    }

    #[test]
    fn test_payload_carries_hashes_never_tokens() {
        let root = TempDir::new().unwrap();
        let ctx = context();
        let evidence = emit_rejection(
            root.path(),
            "lease_ownership_mismatch",
            &ctx,
            &DEFAULT_LIMITS,
        )
        .unwrap();

        let raw = std::fs::read_to_string(&evidence.debug_path).unwrap();
        assert!(!raw.contains("super-secret-token"));
        assert!(!raw.contains("expected-lease-token"));
        assert!(!raw.contains("provided-lease-token"));

        let payload: GuardRejectionDebugV1 = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload.schema, GUARD_REJECTION_SCHEMA);
        assert_eq!(payload.code, "lease_ownership_mismatch");
        assert_eq!(payload.lease_expected_owner, "worker-a");
        assert_eq!(payload.lease_provided_owner, "worker-b");
        assert_eq!(
            payload.lease_provided_token_sha256.as_deref(),
            Some(sha256_hex(b"provided-lease-token").as_str())
        );
    }

    #[test]
    fn test_report_is_blocked_with_code() {
        let root = TempDir::new().unwrap();
        let evidence =
            emit_rejection(root.path(), "lease_expired", &context(), &DEFAULT_LIMITS).unwrap();

        let report: crate::report::RunReport = serde_json::from_slice(
            &std::fs::read(evidence.run_dir.join(RUN_REPORT_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(report.status, RunStatus::Blocked);
        assert_eq!(report.primary_failure_code.as_deref(), Some("lease_expired"));
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].evidence.len(), 1);
    }
}
