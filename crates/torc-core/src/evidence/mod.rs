//! Evidence capture governance.
//!
//! One piece of captured tool/LLM output becomes an [`EvidenceItem`]. Its
//! `kind` maps to a fixed classification group that decides whether the
//! content may be truncated or persisted at all; its storage state is
//! validated exhaustively before anything touches disk; and content too
//! large to inline is referenced through a sandboxed raw pointer whose
//! grammar makes path traversal unrepresentable.

mod classification;
mod error;
mod item;
mod pointer;
mod validator;

pub use classification::{EvidenceClass, classify};
pub use error::ItemError;
pub use item::{EvidenceItem, HashScope, StorageMode};
pub use pointer::{
    EVIDENCE_ROOT, MAX_KIND_SEGMENT_LEN, PointerError, build_pointer, sanitize_kind,
    validate_pointer,
};
pub use validator::{assert_item_valid, validate_item};
