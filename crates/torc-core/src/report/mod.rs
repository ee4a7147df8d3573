//! Terminal run reports.
//!
//! One ticket execution produces exactly one [`RunReport`]: the ordered
//! record of its step outcomes, attempt events, and captured evidence.
//! Assembly is pure aggregation: no I/O, no clock reads beyond the
//! timestamps passed in, deterministic given its inputs. The report is
//! mutated only here, during assembly; once handed to the manifest writer
//! it is frozen.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::evidence::{EvidenceItem, ItemError, StorageMode, validate_item};
use crate::limits::Limits;

/// Terminal status of a run or step, mirroring the orchestrator's
/// run-status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run completed successfully.
    Ok,

    /// The run failed.
    Error,

    /// The run was refused before or during execution.
    Blocked,
}

impl RunStatus {
    /// Returns the canonical string form of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one executed step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step identifier, unique within the run.
    pub step: String,

    /// The tool or adapter the step executed against.
    pub tool: String,

    /// Terminal status of this step.
    pub status: RunStatus,

    /// Failure code when the step did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,

    /// Step wall time in milliseconds.
    pub duration_ms: u64,

    /// Evidence captured during this step, in capture order.
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
}

/// One attempt or retry event observed during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEvent {
    /// The step this attempt belongs to.
    pub step: String,

    /// 1-based attempt number.
    pub attempt: u32,

    /// When the attempt started, RFC 3339.
    pub at: String,

    /// Outcome code of the attempt, when it concluded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The terminal record of one ticket execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The ticket this run executed.
    pub ticket_id: String,

    /// Terminal status of the run.
    pub status: RunStatus,

    /// Primary failure code; present exactly when `status` is not `Ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_failure_code: Option<String>,

    /// Run start, RFC 3339.
    pub started_at: String,

    /// Run end, RFC 3339.
    pub ended_at: String,

    /// Run wall time in milliseconds.
    pub duration_ms: u64,

    /// Step outcomes, in execution order.
    pub steps: Vec<StepReport>,

    /// Attempt/retry events, in the order they were produced.
    pub attempts: Vec<AttemptEvent>,
}

/// Inputs to [`build_run_report`].
#[derive(Debug, Clone)]
pub struct RunReportParams {
    /// The ticket this run executed.
    pub ticket_id: String,

    /// Terminal status of the run.
    pub status: RunStatus,

    /// Primary failure code; required exactly when `status` is not `Ok`.
    pub primary_failure_code: Option<String>,

    /// Run start, RFC 3339.
    pub started_at: String,

    /// Run end, RFC 3339.
    pub ended_at: String,

    /// Run wall time in milliseconds.
    pub duration_ms: u64,

    /// Step outcomes, in execution order.
    pub steps: Vec<StepReport>,

    /// Attempt/retry events, in the order they were produced.
    pub attempts: Vec<AttemptEvent>,
}

/// Reasons report assembly is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportError {
    /// The ticket id is empty.
    #[error("ticket id must not be empty")]
    EmptyTicketId,

    /// A run timestamp is not parseable RFC 3339.
    #[error("{field} '{value}' is not a parseable timestamp")]
    BadTimestamp {
        /// Which timestamp field failed.
        field: &'static str,
        /// The unparseable value.
        value: String,
    },

    /// A non-ok run is missing its primary failure code.
    #[error("terminal status '{status}' requires a primary failure code")]
    MissingFailureCode {
        /// The terminal status.
        status: RunStatus,
    },

    /// An ok run carries a failure code.
    #[error("terminal status 'ok' must not carry failure code '{code}'")]
    UnexpectedFailureCode {
        /// The unexpected code.
        code: String,
    },

    /// An evidence item failed validation at the assembly boundary.
    #[error("invalid evidence item at step {step_index}, item {item_index}: {source}")]
    InvalidItem {
        /// Index of the offending step.
        step_index: usize,
        /// Index of the offending item within the step.
        item_index: usize,
        /// The underlying item rejection.
        #[source]
        source: ItemError,
    },

    /// An evidence item's stored content exceeds the configured ceiling for
    /// its storage mode.
    #[error(
        "oversize evidence item at step {step_index}, item {item_index}: \
         {stored_bytes} bytes exceeds the {ceiling}-byte ceiling"
    )]
    OversizeItem {
        /// Index of the offending step.
        step_index: usize,
        /// Index of the offending item within the step.
        item_index: usize,
        /// Bytes the item stores.
        stored_bytes: u64,
        /// The ceiling that applies to its storage mode.
        ceiling: u64,
    },
}

impl ReportError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyTicketId => "report_empty_ticket_id",
            Self::BadTimestamp { .. } => "report_bad_timestamp",
            Self::MissingFailureCode { .. } => "report_missing_failure_code",
            Self::UnexpectedFailureCode { .. } => "report_unexpected_failure_code",
            Self::InvalidItem { .. } => "report_invalid_item",
            Self::OversizeItem { .. } => "report_oversize_item",
        }
    }
}

/// Assembles the terminal report for one ticket execution.
///
/// Every evidence item is validated here, at the boundary where it enters
/// the persistent record. If the total item count exceeds
/// `limits.max_items_per_report`, the first N items in execution order are
/// kept and the rest are dropped (the fixed
/// [`crate::limits::ITEM_SELECTION_STRATEGY`]); a warning records how many
/// were dropped.
///
/// # Errors
///
/// Returns [`ReportError`] on an empty ticket id, unparseable run
/// timestamps, a status/failure-code mismatch in either direction, or any
/// invalid evidence item.
pub fn build_run_report(
    params: RunReportParams,
    limits: &Limits,
) -> Result<RunReport, ReportError> {
    let RunReportParams {
        ticket_id,
        status,
        primary_failure_code,
        started_at,
        ended_at,
        duration_ms,
        mut steps,
        attempts,
    } = params;

    if ticket_id.is_empty() {
        return Err(ReportError::EmptyTicketId);
    }
    for (field, value) in [("started_at", &started_at), ("ended_at", &ended_at)] {
        if chrono::DateTime::parse_from_rfc3339(value).is_err() {
            return Err(ReportError::BadTimestamp {
                field,
                value: value.clone(),
            });
        }
    }
    match (&status, &primary_failure_code) {
        (RunStatus::Ok, Some(code)) => {
            return Err(ReportError::UnexpectedFailureCode { code: code.clone() });
        },
        (RunStatus::Error | RunStatus::Blocked, None) => {
            return Err(ReportError::MissingFailureCode { status });
        },
        _ => {},
    }

    for (step_index, step) in steps.iter().enumerate() {
        for (item_index, item) in step.evidence.iter().enumerate() {
            validate_item(item).map_err(|source| ReportError::InvalidItem {
                step_index,
                item_index,
                source,
            })?;
            let ceiling = match item.storage {
                StorageMode::Inline => limits.inline_max_bytes,
                StorageMode::Raw => limits.raw_max_bytes,
                StorageMode::Omitted => continue,
            };
            if item.stored_bytes > ceiling {
                return Err(ReportError::OversizeItem {
                    step_index,
                    item_index,
                    stored_bytes: item.stored_bytes,
                    ceiling,
                });
            }
        }
    }

    let dropped = enforce_item_quota(&mut steps, limits.max_items_per_report);
    if dropped > 0 {
        warn!(
            ticket_id = %ticket_id,
            dropped,
            quota = limits.max_items_per_report,
            "evidence item quota exceeded; kept first items in execution order"
        );
    }

    Ok(RunReport {
        ticket_id,
        status,
        primary_failure_code,
        started_at,
        ended_at,
        duration_ms,
        steps,
        attempts,
    })
}

/// Keeps the first `quota` evidence items across steps in execution order.
/// Returns how many items were dropped.
fn enforce_item_quota(steps: &mut [StepReport], quota: usize) -> usize {
    let mut kept: usize = 0;
    let mut dropped: usize = 0;

    for step in steps.iter_mut() {
        let available = quota.saturating_sub(kept);
        if step.evidence.len() > available {
            dropped += step.evidence.len() - available;
            step.evidence.truncate(available);
        }
        kept += step.evidence.len();
    }
    dropped
}
