//! Buffered Byte Sink
//!
//! The write-side counterpart of the source. Writes accumulate into a
//! `BytesMut` buffer and hit the underlying stream only on [`Sink::flush`],
//! which drains everything in one write call. [`Sink::full`] tells callers
//! streaming a large payload (the SYNC reply, the snapshot job) when to
//! flush mid-stream.
//!
//! Helpers cover the three wire shapes the server emits:
//!
//! - raw bytes (status lines like `+OK\r\n`)
//! - protocol strings: `$<len>\r\n<data>\r\n`
//! - arrays of protocol strings: `*<n>\r\n` followed by n protocol strings
//!
//! Each flush reports an [`IoData`] batch for the stats aggregator and
//! bumps the cumulative per-sink counters.

use crate::stats::IoData;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A buffered writer with threshold-based flushing.
#[derive(Debug)]
pub struct Sink<W> {
    writer: W,
    buffer: BytesMut,
    threshold: usize,
    writes: u64,
    bytes_out: u64,
}

impl<W: AsyncWrite + Unpin> Sink<W> {
    /// Creates a sink that reports [`Sink::full`] once `threshold` bytes
    /// are buffered.
    pub fn new(writer: W, threshold: usize) -> Self {
        Self {
            writer,
            buffer: BytesMut::new(),
            threshold,
            writes: 0,
            bytes_out: 0,
        }
    }

    /// Appends raw bytes to the buffer.
    pub fn write(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Appends a protocol string: `$<len>\r\n<data>\r\n`.
    pub fn write_protocol_string(&mut self, data: &[u8]) {
        self.write(format!("${}\r\n", data.len()).as_bytes());
        self.write(data);
        self.write(b"\r\n");
    }

    /// Appends an array header followed by one protocol string per piece.
    pub fn write_array_of_protocol_strings(&mut self, pieces: &[Bytes]) {
        self.write(format!("*{}\r\n", pieces.len()).as_bytes());
        for piece in pieces {
            self.write_protocol_string(piece);
        }
    }

    /// Drains the buffer to the underlying stream in one accounted write.
    ///
    /// An empty buffer is a no-op that reports zero bytes and zero calls.
    pub async fn flush(&mut self) -> std::io::Result<IoData> {
        let mut data = IoData::new();
        if self.buffer.is_empty() {
            return Ok(data);
        }
        self.writer.write_all(&self.buffer).await?;
        self.writer.flush().await?;
        data.add(self.buffer.len());
        self.writes += 1;
        self.bytes_out += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(data)
    }

    /// Buffers raw bytes and flushes.
    pub async fn flush_raw(&mut self, chunk: &[u8]) -> std::io::Result<IoData> {
        self.write(chunk);
        self.flush().await
    }

    /// Buffers one protocol string and flushes.
    pub async fn flush_protocol_string(&mut self, data: &[u8]) -> std::io::Result<IoData> {
        self.write_protocol_string(data);
        self.flush().await
    }

    /// Buffers an array of protocol strings and flushes.
    pub async fn flush_array_of_protocol_strings(
        &mut self,
        pieces: &[Bytes],
    ) -> std::io::Result<IoData> {
        self.write_array_of_protocol_strings(pieces);
        self.flush().await
    }

    /// True once the buffered bytes reach the flush threshold.
    pub fn full(&self) -> bool {
        self.buffer.len() >= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total flush calls that reached the underlying stream.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Total bytes pushed to the underlying stream.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Shuts down the underlying stream (half-closes a socket).
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}
