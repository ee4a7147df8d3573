//! Evidence storage limits.
//!
//! Sizes, counts, and the retention window are environment-overridable;
//! their *semantics* are not. In particular, the item-selection strategy for
//! reports that exceed the item quota is the compile-time constant
//! [`ITEM_SELECTION_STRATEGY`] rather than a struct field, so its
//! immutability is structural: there is no code path that could make a
//! deployment drop anything other than the trailing items.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only item-selection strategy: keep the first N items in execution
/// order, drop the rest. Not environment-overridable.
pub const ITEM_SELECTION_STRATEGY: &str = "keep_first_n";

/// Default ceiling for inline evidence content (64 KiB).
pub const DEFAULT_INLINE_MAX_BYTES: u64 = 64 * 1024;

/// Default ceiling for raw evidence files (16 MiB).
pub const DEFAULT_RAW_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Default maximum number of evidence items embedded in one report.
pub const DEFAULT_MAX_ITEMS_PER_REPORT: usize = 256;

/// Default retention window for run directories, in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Environment variable overriding the inline size ceiling.
pub const ENV_INLINE_MAX_BYTES: &str = "TORC_EVIDENCE_INLINE_MAX_BYTES";

/// Environment variable overriding the raw size ceiling.
pub const ENV_RAW_MAX_BYTES: &str = "TORC_EVIDENCE_RAW_MAX_BYTES";

/// Environment variable overriding the per-report item quota.
pub const ENV_MAX_ITEMS: &str = "TORC_EVIDENCE_MAX_ITEMS";

/// Environment variable overriding the retention window.
pub const ENV_RETENTION_DAYS: &str = "TORC_EVIDENCE_RETENTION_DAYS";

/// Size, count, and retention limits for evidence storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Ceiling for inline evidence content, in bytes.
    pub inline_max_bytes: u64,

    /// Ceiling for raw evidence files, in bytes.
    pub raw_max_bytes: u64,

    /// Maximum evidence items embedded in one run report.
    pub max_items_per_report: usize,

    /// Retention window for run directories, in days.
    pub retention_days: u32,
}

/// Default limits used when no environment overrides are present.
pub const DEFAULT_LIMITS: Limits = Limits {
    inline_max_bytes: DEFAULT_INLINE_MAX_BYTES,
    raw_max_bytes: DEFAULT_RAW_MAX_BYTES,
    max_items_per_report: DEFAULT_MAX_ITEMS_PER_REPORT,
    retention_days: DEFAULT_RETENTION_DAYS,
};

impl Default for Limits {
    fn default() -> Self {
        DEFAULT_LIMITS
    }
}

/// Errors raised while building [`Limits`] from the environment.
///
/// A malformed override is an error, never a silent fallback to the
/// default: a deployment that sets a limit deserves to know it didn't take.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LimitsError {
    /// An override is not a parseable unsigned integer.
    #[error("invalid value for {var}: '{value}' is not an unsigned integer")]
    InvalidValue {
        /// The environment variable name.
        var: &'static str,
        /// The unparseable value.
        value: String,
    },

    /// An override is zero, which would make the subsystem inert.
    #[error("{var} must be greater than zero")]
    Zero {
        /// The environment variable name.
        var: &'static str,
    },
}

impl Limits {
    /// Builds limits from process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`LimitsError`] if any override is malformed or zero.
    pub fn from_env() -> Result<Self, LimitsError> {
        Self::from_env_source(|var| std::env::var(var).ok())
    }

    /// Builds limits from an explicit lookup function.
    ///
    /// Exists so the environment surface can be tested without mutating
    /// process-global state.
    ///
    /// # Errors
    ///
    /// Returns [`LimitsError`] if any override is malformed or zero.
    pub fn from_env_source(
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LimitsError> {
        Ok(Self {
            inline_max_bytes: parse_override(&get, ENV_INLINE_MAX_BYTES, DEFAULT_INLINE_MAX_BYTES)?,
            raw_max_bytes: parse_override(&get, ENV_RAW_MAX_BYTES, DEFAULT_RAW_MAX_BYTES)?,
            max_items_per_report: parse_override(
                &get,
                ENV_MAX_ITEMS,
                DEFAULT_MAX_ITEMS_PER_REPORT as u64,
            )? as usize,
            retention_days: u32::try_from(parse_override(
                &get,
                ENV_RETENTION_DAYS,
                u64::from(DEFAULT_RETENTION_DAYS),
            )?)
            .map_err(|_| LimitsError::InvalidValue {
                var: ENV_RETENTION_DAYS,
                value: get(ENV_RETENTION_DAYS).unwrap_or_default(),
            })?,
        })
    }
}

/// Parses one override, falling back to the default only when the variable
/// is absent entirely.
fn parse_override(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, LimitsError> {
    let Some(raw) = get(var) else {
        return Ok(default);
    };
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| LimitsError::InvalidValue { var, value: raw })?;
    if value == 0 {
        return Err(LimitsError::Zero { var });
    }
    Ok(value)
}
