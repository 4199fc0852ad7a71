//! Protocol implementations.
//!
//! - `resp`: Redis RESP2 decoding

pub mod resp;
