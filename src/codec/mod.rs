//! Codec module - serialization/deserialization for frame payloads.
//!
//! Codecs are implemented as marker structs with static methods rather than
//! trait objects, so call sites stay monomorphic.
//!
//! - [`JsonCodec`] - compact JSON using `serde_json`

mod json;

pub use json::JsonCodec;
