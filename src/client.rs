//! Per-Connection Client Machinery
//!
//! Each accepted connection becomes two tasks and one registry entry:
//!
//! ```text
//!              ┌────────────┐  Event::NewCommand   ┌────────────┐
//!   socket ───>│ read task  │─────────────────────>│            │
//!              │ (parser)   │  Event::ReadingError │ event loop │
//!              └────────────┘                      │            │
//!              ┌────────────┐    reply channel     │            │
//!   socket <───│ write task │<─────────────────────│            │
//!              │ (sink)     │                      └────────────┘
//!              └────────────┘
//! ```
//!
//! The read task owns the parser, the write task owns the sink, and the
//! loop owns the [`Client`] registry entry. Nothing is shared except the
//! atomic I/O counters surfaced by STATS, so no locks are needed anywhere
//! on the hot path.
//!
//! The write task closes the connection when it sends a final response
//! (`+BYE`, fatal errors) or when the loop drops the reply sender on
//! disconnect. The read task stops on EXIT, on fatal errors, or when the
//! peer goes away.

use crate::event::Event;
use crate::protocol::{Parser, Sink, Source, NETWORK_SINK_THRESHOLD, NETWORK_SOURCE_BUFFER};
use crate::response::Response;
use crate::stats::{ConnectionInfo, IoData, IoStats};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::trace;

/// Per-client network counters, updated by the I/O tasks and read by the
/// event loop when it builds the STATS payload.
#[derive(Debug, Default)]
pub struct ClientIo {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl ClientIo {
    pub fn record_input(&self, data: IoData) {
        self.bytes_in.fetch_add(data.bytes as u64, Ordering::Relaxed);
        self.reads.fetch_add(data.calls as u64, Ordering::Relaxed);
    }

    pub fn record_output(&self, data: IoData) {
        self.bytes_out
            .fetch_add(data.bytes as u64, Ordering::Relaxed);
        self.writes.fetch_add(data.calls as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStats {
        IoStats {
            bytes_in: self.bytes_in.load(Ordering::Relaxed) as usize,
            bytes_out: self.bytes_out.load(Ordering::Relaxed) as usize,
            reads: self.reads.load(Ordering::Relaxed) as usize,
            writes: self.writes.load(Ordering::Relaxed) as usize,
        }
    }
}

/// The loop-owned view of one connected client.
#[derive(Debug)]
pub struct Client {
    id: String,
    addr: SocketAddr,
    reply_tx: mpsc::Sender<Response>,
    io: Arc<ClientIo>,
    replica: bool,
}

impl Client {
    /// Registers a freshly accepted connection: splits the stream and
    /// spawns its read and write tasks.
    pub fn spawn(
        id: String,
        stream: TcpStream,
        addr: SocketAddr,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let io = Arc::new(ClientIo::default());
        // Capacity one: the loop blocks on a client that is not draining
        // its replies, which is the backpressure the design wants.
        let (reply_tx, reply_rx) = mpsc::channel(1);
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(read_task(
            id.clone(),
            read_half,
            events.clone(),
            Arc::clone(&io),
        ));
        tokio::spawn(write_task(id.clone(), write_half, reply_rx, events, Arc::clone(&io)));

        Self {
            id,
            addr,
            reply_tx,
            io,
            replica: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }

    pub fn mark_replica(&mut self) {
        self.replica = true;
    }

    /// Hands a reply to the write task. Suspends while the client's
    /// previous reply is still in flight; fails only when the write task
    /// is gone.
    pub async fn enqueue_reply(&self, response: Response) -> Result<(), ()> {
        self.reply_tx.send(response).await.map_err(|_| ())
    }

    /// The STATS entry for this connection.
    pub fn summarize(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            address: self.addr.to_string(),
            network: self.io.snapshot(),
        }
    }
}

/// Reads commands off the socket and turns them into events.
async fn read_task(
    id: String,
    read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<Event>,
    io: Arc<ClientIo>,
) {
    let src = Source::new(read_half, NETWORK_SOURCE_BUFFER);
    let mut parser = Parser::new(src);

    loop {
        let result = parser.next().await;

        let batch = parser.take_io();
        if !batch.is_empty() {
            io.record_input(batch);
            let _ = events.send(Event::network_read(batch));
        }

        match result {
            Ok(command) => {
                trace!(client = %id, command = %command.code(), "New command");
                let is_final = command.is_final();
                if events
                    .send(Event::NewCommand {
                        client_id: id.clone(),
                        command,
                    })
                    .is_err()
                {
                    return;
                }
                if is_final {
                    return;
                }
            }
            Err(error) => {
                let fatal = error.is_fatal();
                let _ = events.send(Event::ReadingError {
                    client_id: id.clone(),
                    error,
                });
                if fatal {
                    return;
                }
            }
        }
    }
}

/// Drains the reply channel into the socket.
async fn write_task(
    id: String,
    write_half: OwnedWriteHalf,
    mut replies: mpsc::Receiver<Response>,
    events: mpsc::UnboundedSender<Event>,
    io: Arc<ClientIo>,
) {
    let mut sink = Sink::new(write_half, NETWORK_SINK_THRESHOLD);

    while let Some(response) = replies.recv().await {
        match response.write(&mut sink).await {
            Ok(data) => {
                io.record_output(data);
                let _ = events.send(Event::network_write(data));

                if response.is_final() {
                    let _ = sink.shutdown().await;
                    let _ = events.send(Event::CloseClient {
                        client_id: id.clone(),
                    });
                    return;
                }
            }
            Err(error) => {
                let _ = events.send(Event::WritingError {
                    client_id: id.clone(),
                    error,
                });
                return;
            }
        }
    }

    // The loop dropped us on disconnect; push the FIN out.
    let _ = sink.shutdown().await;
}
