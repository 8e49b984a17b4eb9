//! Replica Side of Replication
//!
//! A process started with the replica flag never reads a snapshot from
//! disk. It dials its master, sends `SYNC\r\n`, and ingests the reply: an
//! array header announcing the key count, then one array-form SET per
//! item, applied straight into the keyspace before the server starts
//! serving.
//!
//! After the bootstrap the connection stays open and turns into the
//! follow stream: every write the master commits arrives as one more
//! array-form command, parsed by the same parser and posted to the event
//! loop as a source command. Losing the stream (EOF or a transport error)
//! stops the replica; a replica without a master is stale and says so by
//! dying.

use crate::command::CommandCode;
use crate::event::Event;
use crate::keyspace::Keyspace;
use crate::protocol::{
    Parser, Sink, Source, TokenKind, NETWORK_SINK_THRESHOLD, NETWORK_SOURCE_BUFFER,
};
use anyhow::Context;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info};

/// The replica's connection to its master.
pub struct Master {
    address: String,
    parser: Parser<OwnedReadHalf>,
    sink: Sink<OwnedWriteHalf>,
}

impl Master {
    /// Dials the master and wraps the connection in the wire pipeline.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("can not open connection to master server {address}"))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            address: address.to_string(),
            parser: Parser::new(Source::new(read_half, NETWORK_SOURCE_BUFFER)),
            sink: Sink::new(write_half, NETWORK_SINK_THRESHOLD),
        })
    }

    /// Downloads the initial dataset straight into the keyspace.
    pub async fn sync(&mut self, keyspace: &mut Keyspace) -> anyhow::Result<()> {
        info!(master = %self.address, "SYNC with master node");

        self.sink
            .flush_raw(b"SYNC\r\n")
            .await
            .context("error writing SYNC to master")?;

        let token = self
            .parser
            .next_token()
            .await
            .context("error reading from master")?;
        if !token.is(TokenKind::Array) {
            anyhow::bail!(
                "invalid first token from master (expecting array, got {})",
                token.kind()
            );
        }

        let keys = token.size();
        info!(keys, "Downloading keys from master node");

        for _ in 0..keys {
            let command = self
                .parser
                .next()
                .await
                .context("error reading from master")?;
            if command.code() != CommandCode::Set {
                anyhow::bail!("invalid command {} during initial SYNC", command.code());
            }
            keyspace.set(
                command.key().to_string(),
                command.value().clone(),
                command.expiration(),
            );
        }

        info!(keys, "Keys downloaded from master node");
        Ok(())
    }

    /// Starts the follow stream and returns the handle used at teardown.
    pub fn follow(self, events: mpsc::UnboundedSender<Event>) -> MasterHandle {
        tokio::spawn(follow(self.parser, events));
        MasterHandle { sink: self.sink }
    }
}

/// What the server keeps after the follow task takes the read side.
pub struct MasterHandle {
    sink: Sink<OwnedWriteHalf>,
}

impl MasterHandle {
    /// Says goodbye and closes the link. Best effort: a master that is
    /// already gone is not an error worth dying over during teardown.
    pub async fn close(mut self) {
        if let Err(err) = self.sink.flush_raw(b"EXIT\r\n").await {
            error!(error = %err, "Error sending EXIT to master");
        }
        if let Err(err) = self.sink.shutdown().await {
            error!(error = %err, "Error closing connection with master");
        }
    }
}

/// Forwards every command the master sends as a source-command event.
/// Ends the loop with a master-error event when the stream dies.
async fn follow(mut parser: Parser<OwnedReadHalf>, events: mpsc::UnboundedSender<Event>) {
    loop {
        match parser.next().await {
            Ok(command) => {
                if events.send(Event::SourceCommand(command)).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = events.send(Event::MasterError(err));
                return;
            }
        }
    }
}
