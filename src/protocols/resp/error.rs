//! Error types for RESP decoding.

use crate::runtime::buffer::ReadError;

/// Error returned by `RespDecoder::run`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Need more data to make progress.
    /// This is not a fatal error - feed more bytes and call `run` again.
    #[error("incomplete data")]
    Incomplete,

    /// Unknown type tag byte.
    #[error("invalid type tag: {0:#04x}")]
    InvalidTag(u8),

    /// Integer, bulk length or array count line is not a decimal integer.
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Structural violation not covered by the other variants.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Arrays nested deeper than the decoder allows.
    #[error("too many nested RESP arrays: stack depth limit is {0}")]
    RecursionLimit(usize),

    /// The byte source failed.
    #[error("byte source error: {0}")]
    Source(ReadError),

    /// `run` was called after a fatal error without a `reset`.
    #[error("decoder must be reset after a failed parse")]
    NeedsReset,
}

impl DecodeError {
    /// Returns true if this error indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete)
    }
}

impl From<ReadError> for DecodeError {
    fn from(e: ReadError) -> Self {
        if e.is_transient() {
            DecodeError::Incomplete
        } else {
            DecodeError::Source(e)
        }
    }
}
