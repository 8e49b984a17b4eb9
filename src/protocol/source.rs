//! Buffered Byte Source
//!
//! A pull-mode reader with single-byte peek/consume semantics, feeding the
//! tokenizer. The fixed-size buffer is refilled only when it runs dry, and
//! every refill is accounted: a cumulative read/byte counter for per-client
//! statistics, plus a pending [`IoData`] batch the tokenizer drains and
//! ships to the event loop.
//!
//! Buffer sizing is the caller's choice: small for sockets (many short
//! commands), large for snapshot files (one long sequential scan).

use crate::error::ReadError;
use crate::stats::IoData;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A buffered single-byte reader over any async byte stream.
#[derive(Debug)]
pub struct Source<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    reads: u64,
    bytes_in: u64,
    pending: IoData,
}

impl<R: AsyncRead + Unpin> Source<R> {
    /// Creates a source with a buffer of `buf_size` bytes.
    pub fn new(reader: R, buf_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0; buf_size],
            pos: 0,
            len: 0,
            reads: 0,
            bytes_in: 0,
            pending: IoData::new(),
        }
    }

    /// Returns the next byte without consuming it, refilling the buffer if
    /// it is empty.
    ///
    /// # Errors
    ///
    /// [`ReadError::Eof`] when the stream is exhausted, [`ReadError::Io`]
    /// when the underlying read fails.
    pub async fn peek(&mut self) -> Result<u8, ReadError> {
        if !self.has_unread_input() {
            self.load_data().await?;
        }
        Ok(self.buf[self.pos])
    }

    /// Consumes the last peeked byte.
    pub fn rm(&mut self) {
        debug_assert!(self.has_unread_input(), "rm without a buffered byte");
        self.pos += 1;
    }

    /// Drains the I/O accounting accumulated since the last call.
    pub fn take_io(&mut self) -> IoData {
        std::mem::take(&mut self.pending)
    }

    /// Total refill calls made against the underlying reader.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Total bytes pulled from the underlying reader.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    fn has_unread_input(&self) -> bool {
        self.pos < self.len
    }

    async fn load_data(&mut self) -> Result<(), ReadError> {
        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            return Err(ReadError::Eof);
        }
        self.len = n;
        self.pos = 0;
        self.reads += 1;
        self.bytes_in += n as u64;
        self.pending.add(n);
        Ok(())
    }
}
