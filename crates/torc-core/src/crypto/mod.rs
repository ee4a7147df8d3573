//! Cryptographic digest primitives.
//!
//! Artifact content hashes and the manifest self-hash are SHA-256; the hex
//! form is the interchange format recorded in manifests and compared by
//! verifiers.

mod digest;

pub use digest::{SHA256_HEX_LEN, is_sha256_hex, sha256_file, sha256_hex};
