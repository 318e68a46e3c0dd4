//! CBOR encoding of document bodies and tombstones.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the document key attribute.
pub const KEY_FIELD: &str = "_key";

/// Name of the revision id attribute.
pub const REV_FIELD: &str = "_rev";

/// The system attributes that identify one document version.
///
/// This is also the complete payload of a tombstone: a remove only needs to
/// say which key it retires and which revision was current at the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentity {
    /// Document key.
    #[serde(rename = "_key")]
    pub key: String,
    /// Revision id.
    #[serde(rename = "_rev")]
    pub revision: u64,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encodes a document body as CBOR.
///
/// # Errors
///
/// Returns [`CodecError::NotAnObject`] if `body` is not an object.
pub fn encode_body(body: &Value) -> CodecResult<Vec<u8>> {
    if !body.is_object() {
        return Err(CodecError::NotAnObject {
            found: type_name(body),
        });
    }
    let mut out = Vec::with_capacity(64);
    ciborium::into_writer(body, &mut out).map_err(|e| CodecError::encoding(e.to_string()))?;
    Ok(out)
}

/// Decodes a document body previously written by [`encode_body`].
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or not an object.
pub fn decode_body(bytes: &[u8]) -> CodecResult<Value> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject {
            found: type_name(&value),
        });
    }
    Ok(value)
}

/// Encodes a tombstone payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_identity(key: &str, revision: u64) -> CodecResult<Vec<u8>> {
    let identity = DocumentIdentity {
        key: key.to_string(),
        revision,
    };
    let mut out = Vec::with_capacity(key.len() + 16);
    ciborium::into_writer(&identity, &mut out).map_err(|e| CodecError::encoding(e.to_string()))?;
    Ok(out)
}

/// Extracts `_key` and `_rev` from an encoded body or tombstone.
///
/// Other attributes are skipped without being materialised, which keeps
/// recovery and compaction scans cheap.
///
/// # Errors
///
/// Returns an error if either attribute is missing or has the wrong type.
pub fn decode_identity(bytes: &[u8]) -> CodecResult<DocumentIdentity> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_round_trip_keeps_nested_values() {
        let body = json!({
            "_key": "k1",
            "_rev": 42u64,
            "name": "alice",
            "score": -3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "address": {"city": "Lund", "zip": null},
        });

        let bytes = encode_body(&body).unwrap();
        assert_eq!(decode_body(&bytes).unwrap(), body);
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        assert_eq!(
            encode_body(&json!([1, 2])),
            Err(CodecError::NotAnObject { found: "array" })
        );

        let mut bytes = Vec::new();
        ciborium::into_writer(&json!("text"), &mut bytes).unwrap();
        assert_eq!(
            decode_body(&bytes),
            Err(CodecError::NotAnObject { found: "string" })
        );
    }

    #[test]
    fn identity_is_read_from_full_body() {
        let body = json!({"payload": {"deep": [1, 2, 3]}, "_rev": 9u64, "_key": "doc"});
        let bytes = encode_body(&body).unwrap();

        let identity = decode_identity(&bytes).unwrap();
        assert_eq!(identity.key, "doc");
        assert_eq!(identity.revision, 9);
    }

    #[test]
    fn tombstone_payload_decodes_as_identity() {
        let bytes = encode_identity("gone", u64::MAX).unwrap();
        let identity = decode_identity(&bytes).unwrap();
        assert_eq!(identity.key, "gone");
        assert_eq!(identity.revision, u64::MAX);
    }

    #[test]
    fn identity_requires_both_fields() {
        let bytes = encode_body(&json!({"_key": "only-key"})).unwrap();
        assert!(matches!(
            decode_identity(&bytes),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn garbage_is_a_decoding_error() {
        assert!(matches!(
            decode_body(&[0xff, 0x00, 0x13]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
