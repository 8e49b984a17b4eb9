//! Error Taxonomy for the Read Path
//!
//! Everything that can go wrong between a socket and a parsed command is a
//! [`ReadError`]. The variants carry the classification the rest of the
//! server keys off:
//!
//! - **Tokenization** errors mean the byte stream itself is malformed
//!   (illegal char, bad line ending, oversized token). They are *fatal*:
//!   the connection is closed after a best-effort error reply.
//! - **Parsing** errors mean the tokens didn't form a valid command
//!   (unknown command, wrong arity). They are *non-fatal*: the client gets
//!   an error reply and the connection keeps reading.
//! - **Eof** and **Io** are *technical*: the peer went away or the
//!   underlying transport failed. They are handled as disconnects, never
//!   as protocol replies.

use thiserror::Error;

/// An error produced while reading bytes, tokens, or commands from a peer.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The byte stream violated the lexical rules. Fatal for the connection.
    #[error("{0}")]
    Tokenization(String),

    /// The token stream did not form a valid command. The connection survives.
    #[error("{0}")]
    Parsing(String),

    /// The peer closed the connection.
    #[error("end of input")]
    Eof,

    /// The underlying transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadError {
    /// True when the connection cannot keep reading after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReadError::Parsing(_))
    }

    /// True when the cause is the transport, not the protocol.
    pub fn is_technical(&self) -> bool {
        matches!(self, ReadError::Eof | ReadError::Io(_))
    }

    /// True when the peer simply closed its end.
    pub fn is_eof(&self) -> bool {
        matches!(self, ReadError::Eof)
    }
}
