//! Per-connection stream buffer.
//!
//! Network reads land in a `StreamBuffer`, which hands bytes to the decoder
//! through the `ByteSource` trait. The buffer never blocks: when a read
//! cannot be satisfied it reports `NeedMoreData` (or `ShortRead` with the
//! bytes it does have) and the caller retries after the next fill.
//!
//! ## Deferred Discards
//!
//! `discard(n)` may be asked to skip more bytes than are buffered, e.g. when
//! an oversized bulk payload is dropped before it has arrived. The excess is
//! remembered and subtracted from future fills, so skipped payload bytes are
//! never copied into the buffer at all.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read};

/// Default upper bound on a single protocol line (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Error returned by a `ByteSource` read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// No complete line or not a single byte is buffered yet.
    #[error("need more data")]
    NeedMoreData,
    /// Fewer bytes than requested are buffered. Carries every buffered
    /// byte, which the source no longer holds.
    #[error("short read: {} bytes available", .0.len())]
    ShortRead(Bytes),
    /// A line grew past the configured limit without a terminator.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

impl ReadError {
    /// Returns true if the read may succeed once more bytes arrive.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, ReadError::NeedMoreData | ReadError::ShortRead(_))
    }
}

/// Line-delimited and fixed-length reads over a byte stream.
pub trait ByteSource {
    /// Read the bytes before the next line terminator, consuming the
    /// terminator.
    fn read_line(&mut self) -> Result<Bytes, ReadError>;

    /// Read exactly `n` bytes.
    ///
    /// On `ShortRead` the bytes that were available are consumed and handed
    /// to the caller, which must keep them to resume the read.
    fn read_exact(&mut self, n: usize) -> Result<Bytes, ReadError>;

    /// Skip `n` bytes, including bytes that have not been received yet.
    fn discard(&mut self, n: usize);
}

/// Growable receive buffer implementing `ByteSource`.
#[derive(Debug)]
pub struct StreamBuffer {
    /// Received, unconsumed bytes.
    buf: BytesMut,
    /// Bytes still to be skipped from future fills. Non-zero only while
    /// `buf` is empty.
    skip: usize,
    /// Prefix of `buf` already searched for `\n`.
    scanned: usize,
    /// Longest line accepted by `read_line`.
    max_line_length: usize,
    /// Read target for `fill_from`, zeroed once and reused.
    scratch: Vec<u8>,
}

impl StreamBuffer {
    /// Create an empty buffer with the given line length limit.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            skip: 0,
            scanned: 0,
            max_line_length,
            scratch: Vec::new(),
        }
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize, max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            ..Self::new(max_line_length)
        }
    }

    /// Append received bytes, honoring any pending discard.
    pub fn feed(&mut self, data: &[u8]) {
        let skipped = self.skip.min(data.len());
        self.skip -= skipped;
        self.buf.extend_from_slice(&data[skipped..]);
    }

    /// Perform one `read` from `reader` into the buffer.
    ///
    /// Returns the number of bytes the reader produced (0 on EOF), including
    /// any that were immediately dropped by a pending discard.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, chunk: usize) -> io::Result<usize> {
        if self.scratch.len() < chunk {
            self.scratch.resize(chunk, 0);
        }
        let n = reader.read(&mut self.scratch[..chunk])?;

        let skipped = self.skip.min(n);
        self.skip -= skipped;
        self.buf.extend_from_slice(&self.scratch[skipped..n]);
        Ok(n)
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that will be dropped from future fills.
    pub fn pending_discard(&self) -> usize {
        self.skip
    }

    /// Check if nothing is buffered and nothing is pending discard.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.skip == 0
    }

    fn consume(&mut self, n: usize) -> Bytes {
        self.scanned = self.scanned.saturating_sub(n);
        self.buf.split_to(n).freeze()
    }
}

impl ByteSource for StreamBuffer {
    fn read_line(&mut self) -> Result<Bytes, ReadError> {
        if self.skip > 0 {
            return Err(ReadError::NeedMoreData);
        }

        let found = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| self.scanned + pos);

        let Some(newline) = found else {
            self.scanned = self.buf.len();
            // A trailing '\r' may still be the start of the terminator
            let pending_cr = usize::from(self.buf.last() == Some(&b'\r'));
            if self.buf.len() > self.max_line_length + pending_cr {
                return Err(ReadError::LineTooLong {
                    limit: self.max_line_length,
                });
            }
            return Err(ReadError::NeedMoreData);
        };

        let mut end = newline;
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        if end > self.max_line_length {
            return Err(ReadError::LineTooLong {
                limit: self.max_line_length,
            });
        }

        let line = self.buf.split_to(newline + 1).freeze();
        self.scanned = 0;
        Ok(line.slice(..end))
    }

    fn read_exact(&mut self, n: usize) -> Result<Bytes, ReadError> {
        if self.skip == 0 && self.buf.len() >= n {
            return Ok(self.consume(n));
        }
        self.scanned = 0;
        Err(ReadError::ShortRead(self.buf.split().freeze()))
    }

    fn discard(&mut self, n: usize) {
        let buffered = n.min(self.buf.len());
        self.buf.advance(buffered);
        self.scanned = self.scanned.saturating_sub(buffered);
        self.skip += n - buffered;
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_line_crlf() {
        let mut buf = StreamBuffer::default();
        buf.feed(b"+OK\r\n:1\r\n");

        assert_eq!(&buf.read_line().unwrap()[..], b"+OK");
        assert_eq!(&buf.read_line().unwrap()[..], b":1");
        assert_eq!(buf.read_line(), Err(ReadError::NeedMoreData));
        assert_eq!(buf.buffered(), 0);
    }

    #[test]
    fn test_read_line_bare_newline() {
        let mut buf = StreamBuffer::default();
        buf.feed(b"PING\n");
        assert_eq!(&buf.read_line().unwrap()[..], b"PING");
    }

    #[test]
    fn test_read_line_across_feeds() {
        let mut buf = StreamBuffer::default();
        buf.feed(b"hel");
        assert_eq!(buf.read_line(), Err(ReadError::NeedMoreData));
        buf.feed(b"lo\r");
        assert_eq!(buf.read_line(), Err(ReadError::NeedMoreData));
        buf.feed(b"\nrest");
        assert_eq!(&buf.read_line().unwrap()[..], b"hello");
        assert_eq!(buf.buffered(), 4);
    }

    #[test]
    fn test_read_line_too_long() {
        let mut buf = StreamBuffer::new(8);
        buf.feed(b"123456789");
        assert_eq!(buf.read_line(), Err(ReadError::LineTooLong { limit: 8 }));

        let mut buf = StreamBuffer::new(8);
        buf.feed(b"123456789\r\n");
        assert_eq!(buf.read_line(), Err(ReadError::LineTooLong { limit: 8 }));

        let mut buf = StreamBuffer::new(8);
        buf.feed(b"12345678\r\n");
        assert_eq!(&buf.read_line().unwrap()[..], b"12345678");
    }

    #[test]
    fn test_read_exact_short_read_hands_over_bytes() {
        let mut buf = StreamBuffer::default();
        buf.feed(b"abc");

        match buf.read_exact(5) {
            Err(ReadError::ShortRead(partial)) => assert_eq!(&partial[..], b"abc"),
            other => panic!("unexpected: {:?}", other),
        }
        // Partial bytes belong to the caller now
        assert_eq!(buf.buffered(), 0);

        buf.feed(b"de");
        assert_eq!(&buf.read_exact(2).unwrap()[..], b"de");
        assert_eq!(buf.buffered(), 0);
    }

    #[test]
    fn test_read_exact_zero() {
        let mut buf = StreamBuffer::default();
        assert!(buf.read_exact(0).unwrap().is_empty());
    }

    #[test]
    fn test_discard_runs_ahead() {
        let mut buf = StreamBuffer::default();
        buf.feed(b"abc");
        buf.discard(10);

        assert_eq!(buf.buffered(), 0);
        assert_eq!(buf.pending_discard(), 7);
        assert_eq!(buf.read_line(), Err(ReadError::NeedMoreData));

        buf.feed(b"12345");
        assert_eq!(buf.buffered(), 0);
        assert_eq!(buf.pending_discard(), 2);

        buf.feed(b"\r\n+OK\r\n");
        assert!(buf.pending_discard() == 0);
        assert_eq!(&buf.read_line().unwrap()[..], b"+OK");
    }

    #[test]
    fn test_fill_from_reader() {
        let mut reader = Cursor::new(b"0123456789+OK\r\n".to_vec());
        let mut buf = StreamBuffer::with_capacity(16, DEFAULT_MAX_LINE_LENGTH);
        buf.discard(10);

        assert_eq!(buf.fill_from(&mut reader, 4).unwrap(), 4);
        assert_eq!(buf.buffered(), 0);
        assert_eq!(buf.pending_discard(), 6);

        assert_eq!(buf.fill_from(&mut reader, 64).unwrap(), 11);
        assert_eq!(buf.pending_discard(), 0);
        assert_eq!(&buf.read_line().unwrap()[..], b"+OK");

        // EOF
        assert_eq!(buf.fill_from(&mut reader, 64).unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_line_at_limit_split_before_newline() {
        let mut buf = StreamBuffer::new(8);
        buf.feed(b"12345678\r");
        assert_eq!(buf.read_line(), Err(ReadError::NeedMoreData));

        buf.feed(b"\n");
        assert_eq!(&buf.read_line().unwrap()[..], b"12345678");
    }

    #[test]
    fn test_read_line_over_limit_with_trailing_cr() {
        let mut buf = StreamBuffer::new(8);
        buf.feed(b"123456789\r");
        assert_eq!(buf.read_line(), Err(ReadError::LineTooLong { limit: 8 }));
    }

    #[test]
    fn test_fill_from_reuses_scratch_across_reads() {
        let mut reader = Cursor::new(b"+OK\r\n:1\r\n".to_vec());
        let mut buf = StreamBuffer::default();

        assert_eq!(buf.fill_from(&mut reader, 6).unwrap(), 6);
        assert_eq!(buf.fill_from(&mut reader, 3).unwrap(), 3);
        assert_eq!(buf.fill_from(&mut reader, 6).unwrap(), 1);
        assert_eq!(buf.buffered(), 10);
        assert_eq!(&buf.read_line().unwrap()[..], b"+OK");
        assert_eq!(&buf.read_line().unwrap()[..], b":1");
    }
}
