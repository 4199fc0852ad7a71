//! resp-tap: passive RESP traffic inspection.
//!
//! The core is a resumable stack-machine decoder for the Redis
//! Serialization Protocol (`protocols::resp`) that accepts bytes in chunks
//! of any size and never re-reads consumed input. Around it:
//!
//! - `runtime::buffer`: the byte source the decoder reads from
//! - `runtime::session`: per-stream decoding and counters
//! - `runtime`: mio listener and capture replay
//! - `config`: CLI and TOML configuration

pub mod config;
pub mod protocols;
pub mod runtime;
