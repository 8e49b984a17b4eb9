//! # Aetherg - An In-Memory Key-Value Server with Replication
//!
//! Aetherg is a TCP key-value server speaking a small text/binary-hybrid
//! protocol. It keeps everything in memory, persists the permanent subset
//! to a snapshot file, and can stream its dataset to read replicas that
//! follow the master's writes live.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Aetherg                                │
//! │                                                                      │
//! │  ┌──────────┐   ┌───────────────────┐        ┌───────────────────┐   │
//! │  │ Listener │──>│  per-client tasks │        │     Pacemaker     │   │
//! │  └──────────┘   │  (read / write)   │        │      (1 Hz)       │   │
//! │                 └──────┬─────▲──────┘        └─────────┬─────────┘   │
//! │                        │     │ replies                 │             │
//! │                 events ▼     │                         ▼             │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                    Event loop (single consumer)                │  │
//! │  │        keyspace · client registry · replicas · statistics      │  │
//! │  └───────┬─────────────────────────────────────────────▲──────────┘  │
//! │          │ snapshot jobs                               │ source      │
//! │          ▼                                             │ commands    │
//! │  ┌───────────────┐                            ┌────────┴─────────┐   │
//! │  │  Snapshotter  │                            │ Master follower  │   │
//! │  │ (temp+rename) │                            │  (replicas only) │   │
//! │  └───────────────┘                            └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Highlights
//!
//! ### One Loop Owns the State
//!
//! Every mutation of the keyspace, the client registry, and the replica
//! set happens on the event loop. All other tasks post events and never
//! touch shared state, so the command runners need no locks at all.
//!
//! ### Wire Format Everywhere
//!
//! The snapshot file, the replica bootstrap, and the live broadcast all
//! reuse the client wire protocol (array-form SET commands). One parser
//! and one sink cover every byte the server reads or writes.
//!
//! ### Backpressure by Construction
//!
//! Reply channels hold a single in-flight response. A client that stops
//! draining its socket eventually blocks the loop's enqueue rather than
//! growing an unbounded queue.
//!
//! ## Module Overview
//!
//! - [`protocol`]: buffered source/sink, tokenizer, and command parser
//! - [`keyspace`]: the key-to-item map with TTL eviction and dirty tracking
//! - [`command`] / [`response`]: the request and reply vocabulary
//! - [`event`]: the variants flowing through the event channel
//! - [`client`]: per-connection read/write tasks and the registry entry
//! - [`server`]: the event loop, listener, pacemaker, and teardown
//! - [`snapshot`]: background snapshot writer and the startup loader
//! - [`master`]: replica-side SYNC bootstrap and follow stream
//! - [`stats`]: I/O accounting and the STATS payload

pub mod client;
pub mod command;
pub mod error;
pub mod event;
pub mod keyspace;
pub mod master;
pub mod protocol;
pub mod response;
pub mod server;
pub mod snapshot;
pub mod stats;

// Re-export commonly used types for convenience
pub use command::{Command, CommandCode};
pub use error::ReadError;
pub use keyspace::{Item, Keyspace};
pub use response::Response;
pub use server::{Server, Settings, MAX_CLIENTS_ALLOWED};

/// The default host the server binds to.
pub const DEFAULT_HOST: &str = "localhost";

/// The default port the server listens on.
pub const DEFAULT_PORT: u16 = 3000;

/// The default master address a replica syncs from.
pub const DEFAULT_MASTER: &str = "localhost:3000";

/// The default snapshot file path.
pub const DEFAULT_SNAPSHOT: &str = "aetherg.snap";

/// Version of Aetherg.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process exit code for fatal errors.
pub const EXIT_FAILURE: i32 = 1;
