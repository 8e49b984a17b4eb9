//! Wire Protocol Implementation
//!
//! The server speaks a hybrid text/binary protocol: a human-friendly line
//! form (`SET key 'value' EXP 60`) and a length-prefixed array form
//! (`*3\r\n$3\r\nSET\r\n...`) accepted interleaved on the same connection.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──> Source ──> Tokenizer ──> Parser ──> Command
//!                                                  │
//!                                             event loop
//!                                                  │
//! bytes <─────────────── Sink <─────────────── Response
//! ```
//!
//! - `source`: buffered single-byte peek/consume with I/O accounting
//! - `tokenizer`: byte-level state machine producing typed tokens
//! - `parser`: token-level state machine producing commands
//! - `sink`: buffered writer with protocol-string and array helpers
//!
//! The same pipeline runs over sockets (client connections, the master
//! link) and over files (snapshot save and load); only the buffer sizes
//! differ.

pub mod parser;
pub mod sink;
pub mod source;
pub mod tokenizer;

// Re-export commonly used types for convenience
pub use parser::{Parser, MAX_TOKEN_SIZE};
pub use sink::Sink;
pub use source::Source;
pub use tokenizer::{Token, TokenKind, Tokenizer};

/// Source buffer size for network connections.
pub const NETWORK_SOURCE_BUFFER: usize = 128;

/// Source buffer size for snapshot loading.
pub const FILE_SOURCE_BUFFER: usize = 4096;

/// Sink flush threshold for network connections.
pub const NETWORK_SINK_THRESHOLD: usize = 1024;

/// Sink flush threshold for snapshot writing.
pub const FILE_SINK_THRESHOLD: usize = 4096;
