//! Error taxonomy for evidence item validation.

use thiserror::Error;

use super::classification::EvidenceClass;
use super::item::StorageMode;
use super::pointer::PointerError;

/// Reasons an [`super::EvidenceItem`] fails validation.
///
/// Every variant carries a stable code so callers branch on cause, never on
/// message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ItemError {
    /// The `kind` field is empty.
    #[error("evidence kind must not be empty")]
    EmptyKind,

    /// The `source` field is empty.
    #[error("evidence source must not be empty")]
    EmptySource,

    /// The `retrieved_at` field is not a parseable RFC 3339 timestamp.
    #[error("retrieved_at '{value}' is not a parseable timestamp")]
    BadTimestamp {
        /// The unparseable value.
        value: String,
    },

    /// The item's fields contradict its declared storage mode.
    #[error("storage mode {} violated: {detail}", storage.as_str())]
    StorageShape {
        /// The declared storage mode.
        storage: StorageMode,
        /// Which shape rule was broken.
        detail: &'static str,
    },

    /// `stored_bytes` exceeds the known original size.
    #[error("stored_bytes {stored_bytes} exceeds original size {bytes}")]
    StoredExceedsOriginal {
        /// Bytes actually stored.
        stored_bytes: u64,
        /// Known original size.
        bytes: u64,
    },

    /// The `hash` field is present but empty.
    #[error("hash must not be an empty string")]
    EmptyHash,

    /// The `code` field is present but empty.
    #[error("code must not be an empty string")]
    EmptyCode,

    /// The item is marked truncated but its kind or storage forbids it.
    #[error("illegal truncation of '{kind}' (class {class}, storage {})", storage.as_str())]
    IllegalTruncation {
        /// The item kind.
        kind: String,
        /// The classification group that forbids truncation.
        class: EvidenceClass,
        /// The declared storage mode.
        storage: StorageMode,
    },

    /// The item's kind is classified as forbidden-to-persist.
    #[error("kind '{kind}' must never be persisted")]
    ForbiddenKind {
        /// The forbidden kind.
        kind: String,
    },

    /// The raw pointer failed sandbox validation.
    #[error("invalid raw pointer: {source}")]
    InvalidPointer {
        /// The underlying pointer rejection.
        #[source]
        source: PointerError,
    },
}

impl ItemError {
    /// Stable error code for branching and audit logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyKind => "item_empty_kind",
            Self::EmptySource => "item_empty_source",
            Self::BadTimestamp { .. } => "item_bad_timestamp",
            Self::StorageShape { .. } => "item_storage_shape",
            Self::StoredExceedsOriginal { .. } => "item_stored_exceeds_original",
            Self::EmptyHash => "item_empty_hash",
            Self::EmptyCode => "item_empty_code",
            Self::IllegalTruncation { .. } => "item_illegal_truncation",
            Self::ForbiddenKind { .. } => "item_forbidden_kind",
            Self::InvalidPointer { .. } => "item_invalid_pointer",
        }
    }
}
