//! # Strata Codec
//!
//! Encoding of document bodies for Strata.
//!
//! A document body is a JSON-shaped object ([`Value`]) carrying at least the
//! `_key` and `_rev` system attributes. On disk it is stored as CBOR, which
//! keeps it self-describing while being more compact than JSON text.
//!
//! ## Example
//!
//! ```rust
//! use strata_codec::{decode_body, decode_identity, encode_body};
//! use serde_json::json;
//!
//! let body = json!({"_key": "a", "_rev": 7, "x": 1});
//! let bytes = encode_body(&body).unwrap();
//!
//! assert_eq!(decode_body(&bytes).unwrap(), body);
//! let id = decode_identity(&bytes).unwrap();
//! assert_eq!((id.key.as_str(), id.revision), ("a", 7));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod error;
mod merge;

pub use body::{
    decode_body, decode_identity, encode_body, encode_identity, DocumentIdentity, KEY_FIELD,
    REV_FIELD,
};
pub use error::{CodecError, CodecResult};
pub use merge::{get_path, merge_patch, MergeOptions};
pub use serde_json::{Map, Value};
