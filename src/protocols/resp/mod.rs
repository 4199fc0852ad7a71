//! RESP (Redis Serialization Protocol) decoding.
//!
//! Decode-only support for the five RESP2 types. Values are produced by a
//! resumable stack machine that can be fed a byte stream in chunks of any
//! size.

pub mod decoder;
pub mod error;
pub mod value;

pub use decoder::{DecoderOptions, RespDecoder, DEFAULT_BULK_CAPTURE_LIMIT, MAX_DEPTH};
pub use error::DecodeError;
pub use value::Value;
