//! Per-stream decoding session.
//!
//! A session owns the receive buffer and the decoder for one byte stream
//! (one TCP connection, or one replayed capture) and keeps running counts
//! of what it has seen. Sessions are never shared between threads.

use crate::protocols::resp::{DecodeError, DecoderOptions, RespDecoder, Value};
use crate::runtime::buffer::StreamBuffer;
use chrono::{DateTime, Utc};
use std::io::{self, Read};
use tracing::info;

/// Settings shared by every session a worker creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub decoder: DecoderOptions,
    /// Longest protocol line accepted before the stream is rejected.
    pub max_line_length: usize,
    /// Bytes requested from the stream per read.
    pub read_buffer_size: usize,
}

/// Running totals for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes received from the stream.
    pub bytes_received: u64,
    /// Top-level values decoded.
    pub values: u64,
    /// Top-level error replies decoded.
    pub error_replies: u64,
    /// Bulk strings skipped for exceeding the capture limit, at any depth.
    pub omitted_bulks: u64,
}

impl SessionStats {
    fn record(&mut self, value: &Value) {
        self.values += 1;
        if value.is_error() {
            self.error_replies += 1;
        }
        self.omitted_bulks += count_omitted(value);
    }
}

fn count_omitted(value: &Value) -> u64 {
    match value {
        Value::OmittedBulk(_) => 1,
        Value::Array(Some(items)) => items.iter().map(count_omitted).sum(),
        _ => 0,
    }
}

/// Buffer, decoder and counters for one byte stream.
#[derive(Debug)]
pub struct Session {
    buffer: StreamBuffer,
    decoder: RespDecoder,
    stats: SessionStats,
    read_buffer_size: usize,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Create a session ready to decode its first value.
    pub fn new(options: &SessionOptions) -> Self {
        Self {
            buffer: StreamBuffer::with_capacity(options.read_buffer_size, options.max_line_length),
            decoder: RespDecoder::new(options.decoder),
            stats: SessionStats::default(),
            read_buffer_size: options.read_buffer_size,
            opened_at: Utc::now(),
        }
    }

    /// Append bytes received out of band.
    pub fn feed(&mut self, data: &[u8]) {
        self.stats.bytes_received += data.len() as u64;
        self.buffer.feed(data);
    }

    /// Read once from `reader` into the session buffer.
    ///
    /// Returns 0 on EOF.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let n = self.buffer.fill_from(reader, self.read_buffer_size)?;
        self.stats.bytes_received += n as u64;
        Ok(n)
    }

    /// Decode every complete value currently buffered.
    ///
    /// Calls `on_value` for each value in stream order and returns how many
    /// were decoded. A partial trailing value stays in the decoder until
    /// more bytes arrive. Any error other than running out of data is
    /// fatal for the stream.
    pub fn drain<F: FnMut(Value)>(&mut self, mut on_value: F) -> Result<usize, DecodeError> {
        let mut decoded = 0;
        loop {
            match self.decoder.run(&mut self.buffer) {
                Ok(()) => {
                    if let Some(value) = self.decoder.take_result() {
                        self.stats.record(&value);
                        on_value(value);
                        decoded += 1;
                    }
                    self.decoder.reset();
                }
                Err(e) if e.is_incomplete() => return Ok(decoded),
                Err(e) => return Err(e),
            }
        }
    }

    /// Check if the stream stopped in the middle of a value.
    pub fn has_partial(&self) -> bool {
        self.decoder.is_started() || !self.buffer.is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Log the session summary.
    pub fn log_summary(&self, conn_id: usize) {
        let elapsed = Utc::now() - self.opened_at;
        info!(
            conn_id,
            opened_at = %self.opened_at.to_rfc3339(),
            duration_ms = elapsed.num_milliseconds(),
            bytes = self.stats.bytes_received,
            values = self.stats.values,
            error_replies = self.stats.error_replies,
            omitted_bulks = self.stats.omitted_bulks,
            partial = self.has_partial(),
            "Session closed"
        );
    }
}

/// Log one decoded value.
pub fn log_value(conn_id: usize, value: &Value) {
    info!(
        conn_id,
        kind = value.kind(),
        payload_bytes = value.payload_len(),
        value = %value,
        "Decoded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;

    fn options() -> SessionOptions {
        SessionOptions {
            decoder: DecoderOptions {
                bulk_capture_limit: 8,
            },
            max_line_length: 64,
            read_buffer_size: 16,
        }
    }

    #[test]
    fn test_drain_pipelined_values() {
        let mut session = Session::new(&options());
        session.feed(b"+OK\r\n:1\r\n$3\r\nfoo\r\n-ERR x\r\n*1\r\n");

        let mut values = Vec::new();
        let n = session.drain(|v| values.push(v)).unwrap();

        assert_eq!(n, 4);
        assert_eq!(
            values,
            vec![
                Value::Status("OK".into()),
                Value::Integer(1),
                Value::Bulk(Some(Bytes::from_static(b"foo"))),
                Value::Error("ERR x".into()),
            ]
        );
        assert!(session.has_partial());

        session.feed(b"$-1\r\n");
        assert_eq!(session.drain(|v| values.push(v)).unwrap(), 1);
        assert_eq!(values[4], Value::Array(Some(vec![Value::Bulk(None)])));
        assert!(!session.has_partial());

        let stats = session.stats();
        assert_eq!(stats.values, 5);
        assert_eq!(stats.error_replies, 1);
        assert_eq!(stats.bytes_received, 35);
    }

    #[test]
    fn test_drain_counts_omitted_bulks() {
        let mut session = Session::new(&options());
        session.feed(b"*3\r\n$9\r\n123456789\r\n$2\r\nok\r\n$10\r\n0123456789\r\n");

        let mut values = Vec::new();
        session.drain(|v| values.push(v)).unwrap();

        assert_eq!(
            values,
            vec![Value::Array(Some(vec![
                Value::OmittedBulk(9),
                Value::Bulk(Some(Bytes::from_static(b"ok"))),
                Value::OmittedBulk(10),
            ]))]
        );
        assert_eq!(session.stats().omitted_bulks, 2);
        assert!(!session.has_partial());
    }

    #[test]
    fn test_drain_error_is_fatal() {
        let mut session = Session::new(&options());
        session.feed(b":1\r\n&bad\r\n");

        let mut values = Vec::new();
        let err = session.drain(|v| values.push(v)).unwrap_err();
        assert_eq!(err, DecodeError::InvalidTag(b'&'));
        assert_eq!(values, vec![Value::Integer(1)]);
    }

    #[test]
    fn test_fill_from_reader() {
        let data = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n".to_vec();
        let total = data.len();
        let mut reader = Cursor::new(data);
        let mut session = Session::new(&options());

        let mut values = Vec::new();
        loop {
            let n = session.fill_from(&mut reader).unwrap();
            if n == 0 {
                break;
            }
            session.drain(|v| values.push(v)).unwrap();
        }

        assert_eq!(session.stats().bytes_received, total as u64);
        assert_eq!(values.len(), 1);
        assert_eq!(
            values[0].as_bulk_array().unwrap(),
            vec![
                Some(Bytes::from_static(b"ECHO")),
                Some(Bytes::from_static(b"hello"))
            ]
        );
    }
}
