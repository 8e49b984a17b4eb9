//! Events Driving the Server Loop
//!
//! Every task in the process talks to the state-owning loop exclusively by
//! posting one of these variants on the event channel. The loop executes
//! them one at a time, which is the entire concurrency story: no locks on
//! the keyspace or the registries, ever.
//!
//! [`Event::exec`] returns `true` when the loop must stop. Shutdown comes
//! from a signal, a listener accept failure, or (on a replica) losing the
//! master link.

use crate::command::Command;
use crate::error::ReadError;
use crate::stats::{Device, Direction, IoData};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{error, trace, warn};

use crate::server::Server;

/// Everything that can happen to the server, as data.
#[derive(Debug)]
pub enum Event {
    /// The listener accepted a connection below the client limit.
    NewConnection { stream: TcpStream, addr: SocketAddr },
    /// A client's read task parsed a complete command.
    NewCommand { client_id: String, command: Command },
    /// A client's write task finished a final response.
    CloseClient { client_id: String },
    /// A client's read task hit an error (protocol or transport).
    ReadingError {
        client_id: String,
        error: ReadError,
    },
    /// A client's write task failed; always fatal for the connection.
    WritingError {
        client_id: String,
        error: std::io::Error,
    },
    /// The listener itself failed; stops the server.
    AcceptError(std::io::Error),
    /// SIGINT or SIGTERM; stops the server.
    Signal,
    /// The 1 Hz pacemaker tick, numbered from 1.
    Heartbeat(u64),
    /// A write command received over the master link (replicas only).
    SourceCommand(Command),
    /// The master link broke (replicas only); stops the server.
    MasterError(ReadError),
    /// An I/O batch to fold into the statistics.
    IoAccounting {
        device: Device,
        direction: Direction,
        data: IoData,
    },
    /// A connection arrived while the registry is at capacity.
    ConnectionLimitReached(TcpStream),
}

impl Event {
    pub fn network_read(data: IoData) -> Self {
        Event::IoAccounting {
            device: Device::Network,
            direction: Direction::Input,
            data,
        }
    }

    pub fn network_write(data: IoData) -> Self {
        Event::IoAccounting {
            device: Device::Network,
            direction: Direction::Output,
            data,
        }
    }

    pub fn disk_write(data: IoData) -> Self {
        Event::IoAccounting {
            device: Device::Disk,
            direction: Direction::Output,
            data,
        }
    }

    /// Applies this event to the server. Returns `true` to stop the loop.
    pub async fn exec(self, server: &mut Server) -> bool {
        match self {
            Event::NewConnection { stream, addr } => {
                server.register_client(stream, addr);
                false
            }
            Event::NewCommand { client_id, command } => {
                server.handle_command(&client_id, command).await;
                false
            }
            Event::CloseClient { client_id } => {
                server.disconnect(&client_id);
                false
            }
            Event::ReadingError { client_id, error } => {
                server.handle_reading_error(&client_id, error).await;
                false
            }
            Event::WritingError { client_id, error } => {
                error!(client = %client_id, error = %error, "Error writing to client");
                server.disconnect(&client_id);
                false
            }
            Event::AcceptError(error) => {
                error!(error = %error, "Error accepting new connection");
                true
            }
            Event::Signal => {
                warn!("Signal received");
                true
            }
            Event::Heartbeat(beat) => {
                server.heartbeat(beat);
                false
            }
            Event::SourceCommand(command) => {
                trace!(command = %command.code(), "Command received from master");
                server.run_source_command(command);
                false
            }
            Event::MasterError(error) => {
                if error.is_eof() {
                    error!("Master closed the connection (EOF)");
                } else {
                    error!(error = %error, "Error reading from master");
                }
                true
            }
            Event::IoAccounting {
                device,
                direction,
                data,
            } => {
                server.account_for(device, direction, data);
                false
            }
            Event::ConnectionLimitReached(stream) => {
                server.refuse_connection(stream).await;
                false
            }
        }
    }
}
