//! Evidence kind classification.
//!
//! Every captured kind belongs to one governance group that decides its
//! storage treatment. The mapping is frozen in code rather than read from
//! configuration so that truncation and persistence policy cannot drift
//! silently between deployments.

use serde::{Deserialize, Serialize};

/// Kinds whose content is semantically complete and must be preserved
/// whole: truncating one of these loses the meaning of the run.
const COMPLETE_KINDS: &[&str] = &[
    "final_reply",
    "llm_output",
    "structured_result",
    "tool_output",
    "patch",
    "guard_rejection",
];

/// Diagnostic kinds that may be truncated when they exceed the raw size
/// ceiling; losing their tail degrades debuggability, not meaning.
const DIAGNOSTIC_KINDS: &[&str] = &[
    "probe_log",
    "stderr_capture",
    "stdout_capture",
    "trace_preview",
    "retry_log",
];

/// Sensitive kinds that must never be persisted in any form.
const FORBIDDEN_KINDS: &[&str] = &[
    "secret",
    "credential",
    "api_token",
    "session_cookie",
    "raw_pii",
];

/// Governance group of an evidence kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceClass {
    /// Semantically complete content; truncation is a contract violation.
    Complete,

    /// Diagnostic content; may be truncated in raw storage.
    Diagnostic,

    /// Content that must never be persisted.
    Forbidden,

    /// A kind not on any allow-list. Treated like [`Self::Complete`] for
    /// truncation policy: when in doubt, do not truncate.
    Unknown,
}

impl EvidenceClass {
    /// Returns the canonical string form of this class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Diagnostic => "diagnostic",
            Self::Forbidden => "forbidden",
            Self::Unknown => "unknown",
        }
    }

    /// Whether items of this class may be stored truncated.
    #[must_use]
    pub const fn may_truncate(&self) -> bool {
        matches!(self, Self::Diagnostic)
    }

    /// Whether items of this class may be persisted at all.
    #[must_use]
    pub const fn may_persist(&self) -> bool {
        !matches!(self, Self::Forbidden)
    }
}

impl std::fmt::Display for EvidenceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an evidence kind to its governance group.
///
/// Kinds absent from every allow-list classify as [`EvidenceClass::Unknown`],
/// which carries the most conservative truncation policy.
#[must_use]
pub fn classify(kind: &str) -> EvidenceClass {
    if COMPLETE_KINDS.contains(&kind) {
        EvidenceClass::Complete
    } else if DIAGNOSTIC_KINDS.contains(&kind) {
        EvidenceClass::Diagnostic
    } else if FORBIDDEN_KINDS.contains(&kind) {
        EvidenceClass::Forbidden
    } else {
        EvidenceClass::Unknown
    }
}
