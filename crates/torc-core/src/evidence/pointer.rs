//! Sandboxed raw-evidence pointers.
//!
//! Content too large to inline is written under one fixed sandbox root
//! inside the run directory and referenced by a pointer of fixed shape:
//!
//! ```text
//! evidence_store/<yyyy-mm-dd>/<uuid-v4>_<sanitized-kind>.bin
//! ```
//!
//! This module is the traversal defense for that scheme. No caller-supplied
//! string reaches the filesystem layer without passing [`validate_pointer`],
//! and [`build_pointer`] re-validates its own output so a future change to
//! the builder cannot silently start producing invalid shapes.
//!
//! Kind sanitization here is filesystem hygiene only; it is never a
//! substitute for classification or item validation.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// The fixed sandbox root for raw evidence, relative to the run directory.
/// Never the log directory.
pub const EVIDENCE_ROOT: &str = "evidence_store";

/// A pointer is exactly `<root>/<date>/<filename>`.
const POINTER_SEGMENTS: usize = 3;

/// Maximum length of the sanitized kind segment in a pointer filename.
pub const MAX_KIND_SEGMENT_LEN: usize = 40;

/// `<yyyy-mm-dd>` shape; calendar validity is checked separately.
static DATE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid date pattern"));

/// `<36-char uuid>_<lowercase kind>.bin`.
static FILENAME_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}_[a-z0-9_]{1,40}\.bin$",
    )
    .expect("invalid filename pattern")
});

/// Reasons a raw pointer is rejected.
///
/// Traversal-shaped inputs (`..`, absolute prefixes) report distinctly from
/// generic shape violations so audit tooling can tell an attack apart from a
/// malformed record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PointerError {
    /// The pointer is an absolute path.
    #[error("pointer is an absolute path")]
    AbsolutePath,

    /// The pointer uses `~` home-directory shorthand.
    #[error("pointer uses home-directory shorthand")]
    HomeShorthand,

    /// The pointer contains a backslash.
    #[error("pointer contains a backslash")]
    Backslash,

    /// The pointer contains an embedded NUL byte.
    #[error("pointer contains an embedded NUL")]
    EmbeddedNul,

    /// The pointer contains a `.` or `..` segment.
    #[error("pointer contains traversal segment '{segment}'")]
    Traversal {
        /// The offending segment.
        segment: String,
    },

    /// The pointer does not start with the fixed sandbox root.
    #[error("pointer root '{root}' is not the evidence sandbox")]
    WrongRoot {
        /// The first segment found.
        root: String,
    },

    /// The pointer has the wrong number of path segments.
    #[error("pointer has {count} segments, expected {POINTER_SEGMENTS}")]
    SegmentCount {
        /// Number of segments found.
        count: usize,
    },

    /// The date segment is not a valid calendar date.
    #[error("pointer date segment '{value}' is not a valid calendar date")]
    BadDate {
        /// The offending segment.
        value: String,
    },

    /// The filename segment does not match `<uuid>_<kind>.bin`.
    #[error("pointer filename '{value}' does not match the required shape")]
    BadFilename {
        /// The offending segment.
        value: String,
    },

    /// The kind sanitized to an empty string, so no filename can be built.
    #[error("kind sanitizes to an empty filename segment")]
    EmptyKind,
}

impl PointerError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AbsolutePath => "pointer_absolute",
            Self::HomeShorthand => "pointer_home_shorthand",
            Self::Backslash => "pointer_backslash",
            Self::EmbeddedNul => "pointer_embedded_nul",
            Self::Traversal { .. } => "pointer_traversal",
            Self::WrongRoot { .. } => "pointer_wrong_root",
            Self::SegmentCount { .. } => "pointer_segment_count",
            Self::BadDate { .. } => "pointer_bad_date",
            Self::BadFilename { .. } => "pointer_bad_filename",
            Self::EmptyKind => "pointer_empty_kind",
        }
    }
}

/// Reduces a kind label to the safe character set used in pointer
/// filenames: lowercase `[a-z0-9_]`, capped at [`MAX_KIND_SEGMENT_LEN`].
#[must_use]
pub fn sanitize_kind(kind: &str) -> String {
    kind.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .take(MAX_KIND_SEGMENT_LEN)
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Builds a fresh pointer for raw evidence captured at `retrieved_at`.
///
/// The output is re-validated before it is returned.
///
/// # Errors
///
/// Returns [`PointerError::EmptyKind`] if the kind sanitizes to nothing, or
/// any validation error should the built pointer fail its own check.
pub fn build_pointer(retrieved_at: &DateTime<Utc>, kind: &str) -> Result<String, PointerError> {
    let kind_segment = sanitize_kind(kind);
    if kind_segment.is_empty() {
        return Err(PointerError::EmptyKind);
    }

    let date = retrieved_at.format("%Y-%m-%d");
    let id = Uuid::new_v4();
    let pointer = format!("{EVIDENCE_ROOT}/{date}/{id}_{kind_segment}.bin");

    validate_pointer(&pointer)?;
    Ok(pointer)
}

/// Validates a raw pointer against the sandbox grammar.
///
/// # Errors
///
/// Returns the first [`PointerError`] encountered; traversal-shaped inputs
/// are checked before shape details so they always report as such.
pub fn validate_pointer(pointer: &str) -> Result<(), PointerError> {
    if pointer.contains('\0') {
        return Err(PointerError::EmbeddedNul);
    }
    if pointer.contains('\\') {
        return Err(PointerError::Backslash);
    }
    if pointer.starts_with('/') {
        return Err(PointerError::AbsolutePath);
    }
    if pointer.starts_with('~') {
        return Err(PointerError::HomeShorthand);
    }

    let segments: Vec<&str> = pointer.split('/').collect();
    for segment in &segments {
        if *segment == "." || *segment == ".." {
            return Err(PointerError::Traversal {
                segment: (*segment).to_string(),
            });
        }
    }
    if segments.len() != POINTER_SEGMENTS {
        return Err(PointerError::SegmentCount {
            count: segments.len(),
        });
    }
    if segments[0] != EVIDENCE_ROOT {
        return Err(PointerError::WrongRoot {
            root: segments[0].to_string(),
        });
    }

    let date = segments[1];
    if !DATE_SEGMENT.is_match(date) || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(PointerError::BadDate {
            value: date.to_string(),
        });
    }

    let filename = segments[2];
    if !FILENAME_SEGMENT.is_match(filename) {
        return Err(PointerError::BadFilename {
            value: filename.to_string(),
        });
    }

    Ok(())
}
