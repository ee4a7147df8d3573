//! Canonical JSON encoding for deterministic hash input.
//!
//! The encoding follows RFC 8785 (JSON Canonicalization Scheme) ordering and
//! escaping rules, restricted to a strict profile:
//!
//! - **Integer-only numbers**: floats are rejected; numbers must fit in the
//!   signed 64-bit range.
//! - **NFC strings**: all strings (keys and values) must already be in
//!   Unicode NFC form.
//! - **Bounded depth**: values nested deeper than [`MAX_DEPTH`] levels are
//!   rejected.
//! - **Sorted keys**: object keys are emitted in lexicographic byte order
//!   regardless of insertion order.
//! - **Minimal escaping**: only `"`, `\`, and control characters
//!   U+0000..=U+001F are escaped.
//!
//! Duplicate keys cannot occur here because the input is a
//! [`serde_json::Value`], whose object representation already collapses
//! them; callers that accept untrusted JSON text are expected to parse it
//! into a `Value` first.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth accepted by the canonicalizer.
pub const MAX_DEPTH: usize = 128;

/// Errors that can occur while canonicalizing a JSON value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalJsonError {
    /// A floating-point number was encountered.
    ///
    /// Floats have no cross-platform canonical text form in this profile,
    /// so they are rejected outright.
    #[error("float not allowed in canonical JSON")]
    FloatNotAllowed,

    /// A number is outside the signed 64-bit integer range.
    #[error("number out of range: {value} does not fit in a signed 64-bit integer")]
    NumberOutOfRange {
        /// String representation of the out-of-range number.
        value: String,
    },

    /// A string (key or value) is not in Unicode NFC form.
    #[error("non-NFC string at path '{path}'")]
    NonNfcString {
        /// JSON path to the offending string.
        path: String,
    },

    /// The value is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: value nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },

    /// The input could not be converted to a JSON value.
    #[error("value is not JSON-representable: {message}")]
    NotRepresentable {
        /// Description of the conversion failure.
        message: String,
    },
}

/// Canonicalizes a JSON value into its deterministic text encoding.
///
/// The output depends only on the logical content of `value`: two values
/// that compare equal produce identical bytes, whatever the insertion order
/// of their object keys.
///
/// # Errors
///
/// Returns [`CanonicalJsonError`] if the value contains floats, out-of-range
/// integers, non-NFC strings, or exceeds the depth limit.
pub fn canonicalize_value(value: &Value) -> Result<String, CanonicalJsonError> {
    validate_value(value, "", 0)?;
    let mut output = String::new();
    emit_value(value, &mut output);
    Ok(output)
}

/// Serializes any serde-serializable value to canonical JSON bytes.
///
/// This is the entry point used for hash input: the value is converted to a
/// [`serde_json::Value`] and then canonicalized, so serde field order never
/// leaks into the encoding.
///
/// # Errors
///
/// Returns [`CanonicalJsonError::NotRepresentable`] if serde conversion
/// fails, or any canonicalization error from [`canonicalize_value`].
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let json = serde_json::to_value(value).map_err(|e| CanonicalJsonError::NotRepresentable {
        message: e.to_string(),
    })?;
    canonicalize_value(&json).map(String::into_bytes)
}

/// Recursively validates a value against the strict profile.
fn validate_value(value: &Value, path: &str, depth: usize) -> Result<(), CanonicalJsonError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalJsonError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null | Value::Bool(_) => Ok(()),
        Value::Number(n) => validate_number(n),
        Value::String(s) => validate_string(s, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                validate_value(item, &format!("{path}[{i}]"), depth + 1)?;
            }
            Ok(())
        },
        Value::Object(fields) => {
            for (key, val) in fields {
                validate_string(key, &format!("{path}.{key}(key)"))?;
                let val_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                validate_value(val, &val_path, depth + 1)?;
            }
            Ok(())
        },
    }
}

/// Rejects floats and integers outside the i64 range.
fn validate_number(n: &Number) -> Result<(), CanonicalJsonError> {
    if n.is_i64() {
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        if u > i64::MAX as u64 {
            return Err(CanonicalJsonError::NumberOutOfRange {
                value: u.to_string(),
            });
        }
        return Ok(());
    }
    Err(CanonicalJsonError::FloatNotAllowed)
}

/// Rejects strings that are not already NFC-normalized.
fn validate_string(s: &str, path: &str) -> Result<(), CanonicalJsonError> {
    if s.nfc().eq(s.chars()) {
        Ok(())
    } else {
        Err(CanonicalJsonError::NonNfcString {
            path: path.to_string(),
        })
    }
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(items) => {
            output.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    output.push(',');
                }
                emit_value(item, output);
            }
            output.push(']');
        },
        Value::Object(fields) => emit_object(fields, output),
    }
}

/// Emits an integer in plain decimal form. Validation has already rejected
/// everything else.
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        output.push_str(&n.to_string());
    }
}

/// Emits a string with RFC 8785 Section 3.2.2.2 minimal escaping: only `"`,
/// `\`, and U+0000..=U+001F are escaped, the latter with short escapes where
/// JSON defines them.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

/// Emits an object with keys sorted in lexicographic byte order.
fn emit_object(fields: &Map<String, Value>, output: &mut String) {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();

    output.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&fields[*key], output);
    }
    output.push('}');
}

#[cfg(test)]
mod unit_tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sorts_object_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize_value(&value).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(
            canonicalize_value(&value).unwrap(),
            r#"{"outer":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn test_arrays_preserve_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonicalize_value(&value).unwrap(), "[3,1,2]");
    }

    #[test]
    fn test_primitives() {
        assert_eq!(canonicalize_value(&json!(null)).unwrap(), "null");
        assert_eq!(canonicalize_value(&json!(true)).unwrap(), "true");
        assert_eq!(canonicalize_value(&json!(false)).unwrap(), "false");
        assert_eq!(canonicalize_value(&json!(42)).unwrap(), "42");
        assert_eq!(canonicalize_value(&json!(-42)).unwrap(), "-42");
        assert_eq!(canonicalize_value(&json!("hi")).unwrap(), r#""hi""#);
    }

    #[test]
    fn test_reject_float() {
        let result = canonicalize_value(&json!({"x": 1.5}));
        assert_eq!(result, Err(CanonicalJsonError::FloatNotAllowed));
    }

    #[test]
    fn test_reject_u64_above_i64_max() {
        let value = json!({"x": (i64::MAX as u64) + 1});
        assert!(matches!(
            canonicalize_value(&value),
            Err(CanonicalJsonError::NumberOutOfRange { .. })
        ));
    }

    #[test]
    fn test_accept_i64_extremes() {
        assert!(canonicalize_value(&json!({"x": i64::MAX})).is_ok());
        assert!(canonicalize_value(&json!({"x": i64::MIN})).is_ok());
    }

    #[test]
    fn test_reject_non_nfc_string() {
        // "e" followed by U+0301 (combining acute) is not NFC.
        let value = json!({"key": "e\u{0301}"});
        assert!(matches!(
            canonicalize_value(&value),
            Err(CanonicalJsonError::NonNfcString { .. })
        ));
    }

    #[test]
    fn test_reject_non_nfc_key() {
        let value = json!({"e\u{0301}": "value"});
        assert!(matches!(
            canonicalize_value(&value),
            Err(CanonicalJsonError::NonNfcString { .. })
        ));
    }

    #[test]
    fn test_reject_excessive_depth() {
        let mut value = json!(0);
        for _ in 0..(MAX_DEPTH + 10) {
            value = json!({ "n": value });
        }
        assert!(matches!(
            canonicalize_value(&value),
            Err(CanonicalJsonError::MaxDepthExceeded { .. })
        ));
    }

    #[test]
    fn test_minimal_escaping() {
        let value = json!({"text": "line1\nline2\ttab \"quoted\" back\\slash"});
        assert_eq!(
            canonicalize_value(&value).unwrap(),
            r#"{"text":"line1\nline2\ttab \"quoted\" back\\slash"}"#
        );
    }

    #[test]
    fn test_control_chars_escaped_del_not() {
        let value = json!({"text": "\u{0000}\u{007F}"});
        let out = canonicalize_value(&value).unwrap();
        assert!(out.contains("\\u0000"), "NUL must be escaped: {out}");
        assert!(
            !out.contains("\\u007f"),
            "DEL must not be escaped per JCS: {out}"
        );
    }

    #[test]
    fn test_determinism_across_key_orders() {
        let mut a = Map::new();
        a.insert("c".into(), json!(3));
        a.insert("a".into(), json!(1));
        a.insert("b".into(), json!(2));

        let mut b = Map::new();
        b.insert("b".into(), json!(2));
        b.insert("c".into(), json!(3));
        b.insert("a".into(), json!(1));

        assert_eq!(
            canonicalize_value(&Value::Object(a)).unwrap(),
            canonicalize_value(&Value::Object(b)).unwrap()
        );
    }

    #[test]
    fn test_canonical_bytes_of_struct() {
        #[derive(Serialize)]
        struct Record {
            zulu: u32,
            alpha: &'static str,
        }

        let bytes = canonical_bytes(&Record {
            zulu: 7,
            alpha: "x",
        })
        .unwrap();
        assert_eq!(bytes, br#"{"alpha":"x","zulu":7}"#);
    }

    #[test]
    fn test_idempotent() {
        let value = json!({"nested": {"b": 2, "a": 1}, "top": [1, 2, {"y": 3, "x": 4}]});
        let once = canonicalize_value(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canonicalize_value(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    proptest! {
        /// Canonical output is stable however the same pairs are inserted.
        #[test]
        fn prop_insertion_order_invariant(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", -1000i64..1000, 1..8)
        ) {
            let mut forward = Map::new();
            for (k, v) in &pairs {
                forward.insert(k.clone(), json!(v));
            }
            let mut reverse = Map::new();
            for (k, v) in pairs.iter().rev() {
                reverse.insert(k.clone(), json!(v));
            }
            prop_assert_eq!(
                canonicalize_value(&Value::Object(forward)).unwrap(),
                canonicalize_value(&Value::Object(reverse)).unwrap()
            );
        }

        /// Canonicalization round-trips through a JSON parser unchanged.
        #[test]
        fn prop_reparse_idempotent(s in "[ -~]{0,32}") {
            prop_assume!(s.nfc().eq(s.chars()));
            let value = json!({ "payload": s });
            let once = canonicalize_value(&value).unwrap();
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            prop_assert_eq!(once, canonicalize_value(&reparsed).unwrap());
        }
    }
}
