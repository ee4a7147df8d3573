//! The evidence item record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::sha256_hex;

/// Where the content of an evidence item lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// The content is embedded in the item itself.
    Inline,

    /// The content lives in a sandboxed raw file referenced by pointer.
    Raw,

    /// The content was not stored (only its metadata survives).
    Omitted,
}

impl StorageMode {
    /// Returns the canonical string form of this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Raw => "raw",
            Self::Omitted => "omitted",
        }
    }
}

/// What the `hash` field of an item was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScope {
    /// The hash covers the original, pre-storage content.
    Original,

    /// The hash covers exactly the bytes that were stored.
    Stored,

    /// The hash covers a prefix of the original content.
    Prefix,

    /// The hash provenance is unknown.
    Unknown,
}

/// One captured, classified piece of tool/LLM output.
///
/// Items are created by a collaborator at capture time, validated once by
/// [`crate::evidence::validate_item`], and never mutated afterwards; they are
/// either embedded in a run report or referenced from it by raw pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Content kind label, e.g. `"llm_output"` or `"probe_log"`.
    pub kind: String,

    /// Origin identifier (adapter name, worker id).
    pub source: String,

    /// Capture timestamp, RFC 3339.
    pub retrieved_at: String,

    /// Where the content lives.
    pub storage: StorageMode,

    /// Original content size in bytes, when known.
    pub bytes: Option<u64>,

    /// Number of bytes actually stored.
    pub stored_bytes: u64,

    /// Whether the stored content is a truncation of the original.
    pub truncated: bool,

    /// Content hash (lowercase hex), when computed.
    pub hash: Option<String>,

    /// What the hash was computed over.
    pub hash_scope: HashScope,

    /// Free-form structured metadata from the capturing collaborator.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Inline content, present only for [`StorageMode::Inline`].
    pub inline: Option<String>,

    /// Sandboxed pointer, present only for [`StorageMode::Raw`].
    pub raw_pointer: Option<String>,

    /// Optional collaborator-supplied outcome code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl EvidenceItem {
    /// Builds an inline item whose hash covers exactly the stored content.
    #[must_use]
    pub fn inline(
        kind: impl Into<String>,
        source: impl Into<String>,
        retrieved_at: &DateTime<Utc>,
        content: String,
    ) -> Self {
        let len = content.len() as u64;
        Self {
            kind: kind.into(),
            source: source.into(),
            retrieved_at: retrieved_at.to_rfc3339(),
            storage: StorageMode::Inline,
            bytes: Some(len),
            stored_bytes: len,
            truncated: false,
            hash: Some(sha256_hex(content.as_bytes())),
            hash_scope: HashScope::Stored,
            metadata: Map::new(),
            inline: Some(content),
            raw_pointer: None,
            code: None,
        }
    }

    /// Builds a raw item referencing already-materialized sandboxed content.
    #[must_use]
    pub fn raw(
        kind: impl Into<String>,
        source: impl Into<String>,
        retrieved_at: &DateTime<Utc>,
        raw_pointer: String,
        stored_bytes: u64,
        original_bytes: Option<u64>,
        truncated: bool,
        stored_hash: String,
    ) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            retrieved_at: retrieved_at.to_rfc3339(),
            storage: StorageMode::Raw,
            bytes: original_bytes,
            stored_bytes,
            truncated,
            hash: Some(stored_hash),
            hash_scope: HashScope::Stored,
            metadata: Map::new(),
            inline: None,
            raw_pointer: Some(raw_pointer),
            code: None,
        }
    }

    /// Builds an omitted item: only provenance survives, no content.
    #[must_use]
    pub fn omitted(
        kind: impl Into<String>,
        source: impl Into<String>,
        retrieved_at: &DateTime<Utc>,
        original_bytes: Option<u64>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            retrieved_at: retrieved_at.to_rfc3339(),
            storage: StorageMode::Omitted,
            bytes: original_bytes,
            stored_bytes: 0,
            truncated: false,
            hash: None,
            hash_scope: HashScope::Unknown,
            metadata: Map::new(),
            inline: None,
            raw_pointer: None,
            code: None,
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn capture_time() -> DateTime<Utc> {
        "2024-01-15T10:30:00Z".parse().unwrap()
    }

    #[test]
    fn test_inline_constructor_hashes_stored_content() {
        let item = EvidenceItem::inline("final_reply", "worker-1", &capture_time(), "done".into());

        assert_eq!(item.storage, StorageMode::Inline);
        assert_eq!(item.bytes, Some(4));
        assert_eq!(item.stored_bytes, 4);
        assert_eq!(item.hash_scope, HashScope::Stored);
        assert_eq!(item.hash.as_deref(), Some(crate::crypto::sha256_hex(b"done").as_str()));
        assert!(!item.truncated);
        assert!(item.raw_pointer.is_none());
    }

    #[test]
    fn test_omitted_constructor() {
        let item = EvidenceItem::omitted("probe_log", "adapter-fs", &capture_time(), Some(9000));

        assert_eq!(item.storage, StorageMode::Omitted);
        assert_eq!(item.stored_bytes, 0);
        assert!(item.inline.is_none());
        assert!(item.raw_pointer.is_none());
        assert!(item.hash.is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut item =
            EvidenceItem::inline("tool_output", "adapter-web", &capture_time(), "{}".into());
        item.metadata
            .insert("url".into(), serde_json::json!("https://example.test"));

        let json = serde_json::to_string(&item).unwrap();
        let back: EvidenceItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn test_storage_mode_strings() {
        assert_eq!(StorageMode::Inline.as_str(), "inline");
        assert_eq!(StorageMode::Raw.as_str(), "raw");
        assert_eq!(StorageMode::Omitted.as_str(), "omitted");
        assert_eq!(
            serde_json::to_string(&StorageMode::Raw).unwrap(),
            "\"raw\""
        );
    }
}
