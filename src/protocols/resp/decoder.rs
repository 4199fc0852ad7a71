//! Resumable RESP decoder.
//!
//! RESP arrays may nest arbitrarily, so rather than recursive descent the
//! decoder runs an explicit stack machine. Each frame holds the next step of
//! one sub-parse and a slot for the result of the frame above it.
//!
//! When the byte source runs dry the stack is left exactly as it is and
//! `run` reports `DecodeError::Incomplete`; calling `run` again after more
//! bytes arrive resumes the top frame. Every change in what is being read
//! from the source is a push, a pop, or a replacement of the top frame's
//! action.
//!
//! The first frame is a sink that holds the final value and is never
//! executed. A parse is complete when only the sink remains.

use super::error::DecodeError;
use super::value::Value;
use crate::runtime::buffer::{ByteSource, ReadError};
use bytes::{Bytes, BytesMut};
use tracing::trace;

const TAG_STATUS: u8 = b'+';
const TAG_ERROR: u8 = b'-';
const TAG_INTEGER: u8 = b':';
const TAG_BULK: u8 = b'$';
const TAG_ARRAY: u8 = b'*';

/// Length of the terminator following a bulk payload.
const CRLF_LEN: usize = 2;

/// Maximum stack length, sink included, at which a value may start.
pub const MAX_DEPTH: usize = 8;

/// Upper bound on array slots reserved up front from a declared count.
const MAX_ARRAY_PREALLOC: usize = 1024;

/// Default bulk capture limit (64 KiB).
pub const DEFAULT_BULK_CAPTURE_LIMIT: usize = 64 * 1024;

/// Decoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Bulk payloads longer than this are skipped and reported by length.
    pub bulk_capture_limit: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            bulk_capture_limit: DEFAULT_BULK_CAPTURE_LIMIT,
        }
    }
}

/// Pending step of a frame.
#[derive(Debug)]
enum Action {
    /// Root frame; holds the final result and never runs.
    Sink,
    /// Read a type tag and dispatch.
    Value,
    /// Read a status or error line.
    SimpleString { error: bool },
    /// Read a decimal integer line.
    Integer,
    /// Decide how to read a bulk payload from the length below.
    BulkLength,
    /// Read `remaining` more payload bytes into `accum`.
    BulkPayload { accum: BytesMut, remaining: usize },
    /// Decide how to read array elements from the count below.
    ArrayLength,
    /// Collect element results until `remaining` reaches zero.
    ArrayFields { items: Vec<Value>, remaining: usize },
}

#[derive(Debug)]
struct Frame {
    action: Action,
    result: Option<Value>,
}

impl Frame {
    fn new(action: Action) -> Self {
        Self {
            action,
            result: None,
        }
    }
}

/// Stack machine decoding one RESP value per `reset`/`run` cycle.
///
/// A decoder is meant to live as long as its connection and be reset
/// between values; resetting keeps the stack allocation.
///
/// # Example
///
/// ```
/// use resp_tap::protocols::resp::{DecoderOptions, RespDecoder, Value};
/// use resp_tap::runtime::buffer::StreamBuffer;
///
/// let mut buf = StreamBuffer::default();
/// let mut decoder = RespDecoder::new(DecoderOptions::default());
///
/// buf.feed(b":10");
/// assert!(decoder.run(&mut buf).unwrap_err().is_incomplete());
///
/// buf.feed(b"00\r\n");
/// decoder.run(&mut buf).unwrap();
/// assert_eq!(decoder.result(), Some(&Value::Integer(1000)));
/// ```
#[derive(Debug)]
pub struct RespDecoder {
    stack: Vec<Frame>,
    options: DecoderOptions,
    poisoned: bool,
}

impl RespDecoder {
    /// Create a decoder ready to read a single value.
    pub fn new(options: DecoderOptions) -> Self {
        let mut stack = Vec::with_capacity(MAX_DEPTH + 1);
        stack.push(Frame::new(Action::Sink));
        stack.push(Frame::new(Action::Value));
        Self {
            stack,
            options,
            poisoned: false,
        }
    }

    /// Discard all state and prepare to read the next value.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
        self.stack[0].result = None;
        self.stack.push(Frame::new(Action::Value));
        self.poisoned = false;
    }

    /// Current stack length, sink included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Check if a full value has been decoded.
    pub fn is_complete(&self) -> bool {
        self.stack.len() == 1
    }

    /// Check if the current value has consumed any bytes yet.
    pub fn is_started(&self) -> bool {
        match self.stack.as_slice() {
            [_] => false,
            [_, frame] => !matches!(frame.action, Action::Value),
            _ => true,
        }
    }

    /// Run frames until the value is complete or a step fails.
    ///
    /// `Err(DecodeError::Incomplete)` leaves the decoder resumable. Any
    /// other error is fatal and the decoder must be reset before reuse.
    pub fn run<S: ByteSource>(&mut self, src: &mut S) -> Result<(), DecodeError> {
        if self.poisoned {
            return Err(DecodeError::NeedsReset);
        }
        while self.stack.len() > 1 {
            if let Err(e) = self.step(src) {
                if !e.is_incomplete() {
                    trace!(depth = self.stack.len(), error = %e, "decode failed");
                    self.poisoned = true;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Value held by the top frame; the decoded value once complete.
    pub fn result(&self) -> Option<&Value> {
        if self.poisoned {
            return None;
        }
        self.stack.last().and_then(|frame| frame.result.as_ref())
    }

    /// Move the decoded value out. Returns `None` until the parse is
    /// complete.
    pub fn take_result(&mut self) -> Option<Value> {
        if !self.is_complete() || self.poisoned {
            return None;
        }
        self.stack[0].result.take()
    }

    /// Decoded value as a command-style list of bulk arguments.
    ///
    /// See `Value::as_bulk_array`.
    pub fn bulk_array(&self) -> Option<Vec<Option<Bytes>>> {
        self.result().and_then(Value::as_bulk_array)
    }

    fn push(&mut self, action: Action) {
        self.stack.push(Frame::new(action));
    }

    /// Remove the top frame and store `result` in the frame below.
    fn pop(&mut self, result: Value) {
        self.stack.pop();
        if let Some(parent) = self.stack.last_mut() {
            parent.result = Some(result);
        }
    }

    /// Replace the top frame's action without changing depth.
    fn replace(&mut self, action: Action) {
        if let Some(top) = self.stack.last_mut() {
            top.action = action;
        }
    }

    /// Take the integer left by a child `Integer` frame.
    fn take_child_integer(&mut self) -> Result<i64, DecodeError> {
        match self.stack.last_mut().and_then(|top| top.result.take()) {
            Some(Value::Integer(n)) => Ok(n),
            _ => Err(DecodeError::Protocol("expected length from child frame")),
        }
    }

    fn step<S: ByteSource>(&mut self, src: &mut S) -> Result<(), DecodeError> {
        let depth = self.stack.len();
        let frame = &mut self.stack[depth - 1];

        match &mut frame.action {
            Action::Sink => {
                debug_assert!(false, "sink frame executed");
                Ok(())
            }

            Action::Value => {
                if depth > MAX_DEPTH {
                    return Err(DecodeError::RecursionLimit(MAX_DEPTH));
                }
                let tag = src.read_exact(1)?[0];
                match tag {
                    TAG_STATUS => self.replace(Action::SimpleString { error: false }),
                    TAG_ERROR => self.replace(Action::SimpleString { error: true }),
                    TAG_INTEGER => self.replace(Action::Integer),
                    TAG_BULK => {
                        self.replace(Action::BulkLength);
                        self.push(Action::Integer);
                    }
                    TAG_ARRAY => {
                        self.replace(Action::ArrayLength);
                        self.push(Action::Integer);
                    }
                    other => return Err(DecodeError::InvalidTag(other)),
                }
                Ok(())
            }

            Action::SimpleString { error } => {
                let error = *error;
                let line = src.read_line()?;
                let text = String::from_utf8_lossy(&line).into_owned();
                self.pop(if error {
                    Value::Error(text)
                } else {
                    Value::Status(text)
                });
                Ok(())
            }

            Action::Integer => {
                let line = src.read_line()?;
                let n = parse_integer(&line)?;
                self.pop(Value::Integer(n));
                Ok(())
            }

            Action::BulkLength => {
                let declared = self.take_child_integer()?;
                if declared < 0 {
                    self.pop(Value::Bulk(None));
                    return Ok(());
                }
                let len = usize::try_from(declared)
                    .map_err(|_| DecodeError::Protocol("bulk length out of range"))?;

                if len <= self.options.bulk_capture_limit {
                    self.replace(Action::BulkPayload {
                        accum: BytesMut::new(),
                        remaining: len,
                    });
                } else {
                    let skip = len
                        .checked_add(CRLF_LEN)
                        .ok_or(DecodeError::Protocol("bulk length out of range"))?;
                    src.discard(skip);
                    trace!(len, "bulk payload over capture limit, skipping");
                    self.pop(Value::OmittedBulk(len));
                }
                Ok(())
            }

            Action::BulkPayload { accum, remaining } => {
                let data = match src.read_exact(*remaining) {
                    Ok(tail) if accum.is_empty() => tail,
                    Ok(tail) => {
                        accum.extend_from_slice(&tail);
                        std::mem::take(accum).freeze()
                    }
                    Err(ReadError::ShortRead(partial)) => {
                        if accum.is_empty() {
                            accum.reserve(*remaining);
                        }
                        accum.extend_from_slice(&partial);
                        *remaining -= partial.len();
                        return Err(DecodeError::Incomplete);
                    }
                    Err(e) => return Err(e.into()),
                };
                src.discard(CRLF_LEN);
                self.pop(Value::Bulk(Some(data)));
                Ok(())
            }

            Action::ArrayLength => {
                let declared = self.take_child_integer()?;
                if declared < 0 {
                    self.pop(Value::Array(None));
                    return Ok(());
                }
                if declared == 0 {
                    self.pop(Value::Array(Some(Vec::new())));
                    return Ok(());
                }
                let count = usize::try_from(declared)
                    .map_err(|_| DecodeError::Protocol("array length out of range"))?;

                self.replace(Action::ArrayFields {
                    items: Vec::with_capacity(count.min(MAX_ARRAY_PREALLOC)),
                    remaining: count,
                });
                self.push(Action::Value);
                Ok(())
            }

            Action::ArrayFields { items, remaining } => {
                let item = frame
                    .result
                    .take()
                    .ok_or(DecodeError::Protocol("array element missing"))?;
                items.push(item);
                *remaining -= 1;

                if *remaining == 0 {
                    let items = std::mem::take(items);
                    self.pop(Value::Array(Some(items)));
                } else {
                    self.push(Action::Value);
                }
                Ok(())
            }
        }
    }
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self::new(DecoderOptions::default())
    }
}

/// Parse a decimal integer line.
///
/// Bulk lengths and array counts go through here too, so a malformed
/// length is reported as `InvalidInteger`.
fn parse_integer(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}
