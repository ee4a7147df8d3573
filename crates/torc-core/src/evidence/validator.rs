//! Exhaustive validation of evidence items.
//!
//! An item is validated once, at the boundary where it is about to be
//! written into a report; a rejected item never reaches the filesystem.

use super::classification::{EvidenceClass, classify};
use super::error::ItemError;
use super::item::{EvidenceItem, HashScope, StorageMode};
use super::pointer::validate_pointer;

/// Validates every structural and storage-state invariant of an item.
///
/// # Errors
///
/// Returns the first [`ItemError`] found. Checks run in a fixed order:
/// field presence, persistence eligibility, timestamp, size accounting,
/// storage shape, pointer validity, truncation legality.
pub fn validate_item(item: &EvidenceItem) -> Result<(), ItemError> {
    if item.kind.is_empty() {
        return Err(ItemError::EmptyKind);
    }
    if item.source.is_empty() {
        return Err(ItemError::EmptySource);
    }

    let class = classify(&item.kind);
    if !class.may_persist() {
        return Err(ItemError::ForbiddenKind {
            kind: item.kind.clone(),
        });
    }

    if chrono::DateTime::parse_from_rfc3339(&item.retrieved_at).is_err() {
        return Err(ItemError::BadTimestamp {
            value: item.retrieved_at.clone(),
        });
    }

    if let Some(hash) = &item.hash {
        if hash.is_empty() {
            return Err(ItemError::EmptyHash);
        }
    }
    if let Some(code) = &item.code {
        if code.is_empty() {
            return Err(ItemError::EmptyCode);
        }
    }

    if let Some(bytes) = item.bytes {
        if item.stored_bytes > bytes {
            return Err(ItemError::StoredExceedsOriginal {
                stored_bytes: item.stored_bytes,
                bytes,
            });
        }
    }

    check_storage_shape(item)?;
    check_truncation(item, class)?;
    Ok(())
}

/// Same check as [`validate_item`], but a violation is a hard failure.
///
/// For call sites that have already decided the item must be valid (for
/// example, immediately before embedding it in a report they constructed
/// themselves) and want to fail loudly if that assumption is ever wrong.
///
/// # Panics
///
/// Panics with the stable error code if the item violates any invariant.
pub fn assert_item_valid(item: &EvidenceItem) {
    if let Err(err) = validate_item(item) {
        panic!(
            "evidence item invariant violated ({code}): {err}",
            code = err.code()
        );
    }
}

/// Enforces the field shape implied by the declared storage mode.
fn check_storage_shape(item: &EvidenceItem) -> Result<(), ItemError> {
    let shape = |detail: &'static str| ItemError::StorageShape {
        storage: item.storage,
        detail,
    };

    match item.storage {
        StorageMode::Inline => {
            if item.inline.is_none() {
                return Err(shape("inline content is required"));
            }
            if item.raw_pointer.is_some() {
                return Err(shape("raw_pointer must be absent"));
            }
            if item.hash_scope != HashScope::Stored {
                return Err(shape("hash_scope must be 'stored'"));
            }
        },
        StorageMode::Raw => {
            if item.inline.is_some() {
                return Err(shape("inline content must be absent"));
            }
            let Some(pointer) = &item.raw_pointer else {
                return Err(shape("raw_pointer is required"));
            };
            validate_pointer(pointer)
                .map_err(|source| ItemError::InvalidPointer { source })?;
            if item.hash_scope != HashScope::Stored {
                return Err(shape("hash_scope must be 'stored'"));
            }
        },
        StorageMode::Omitted => {
            if item.inline.is_some() {
                return Err(shape("inline content must be absent"));
            }
            if item.raw_pointer.is_some() {
                return Err(shape("raw_pointer must be absent"));
            }
            if item.stored_bytes != 0 {
                return Err(shape("stored_bytes must be zero"));
            }
        },
    }
    Ok(())
}

/// A truncated item must use raw storage and carry a diagnostic kind.
fn check_truncation(item: &EvidenceItem, class: EvidenceClass) -> Result<(), ItemError> {
    if item.truncated && (item.storage != StorageMode::Raw || !class.may_truncate()) {
        return Err(ItemError::IllegalTruncation {
            kind: item.kind.clone(),
            class,
            storage: item.storage,
        });
    }
    Ok(())
}
