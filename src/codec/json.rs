//! JSON codec using `serde_json`.
//!
//! Every frame on the wire is a single JSON document without embedded
//! newlines. `serde_json::to_vec` never pretty-prints, so encoded frames are
//! safe to delimit with `\n`.
//!
//! # Example
//!
//! ```
//! use mutation_server_client::codec::JsonCodec;
//! use mutation_server_client::InstrumentParams;
//!
//! let params = InstrumentParams { glob_patterns: Some(vec!["src/**/*.ts".into()]) };
//! let encoded = JsonCodec::encode(&params).unwrap();
//! assert_eq!(&encoded[..], br#"{"globPatterns":["src/**/*.ts"]}"#);
//!
//! let decoded: InstrumentParams = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, params);
//! ```

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert an untyped value into T.
    #[inline]
    pub fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }

    /// Convert T into an untyped value.
    #[inline]
    pub fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }
}
