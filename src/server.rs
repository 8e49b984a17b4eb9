//! The Server: State Owner and Event Loop
//!
//! One task owns everything mutable: the keyspace, the client registry,
//! the replica subset, the statistics, and the snapshot flag. Every other
//! task (listener, pacemaker, signal watcher, per-client I/O, the master
//! follower, snapshot jobs) communicates with it exclusively through the
//! event channel.
//!
//! ## Task layout
//!
//! ```text
//!  listener ──┐
//!  pacemaker ─┤                    ┌─> client write tasks (reply channels)
//!  signals ───┼──> event channel ──┤
//!  clients ───┤    (single consumer│
//!  follower ──┘     = this loop)   └─> snapshot jobs (spawned)
//! ```
//!
//! The loop runs until a signal arrives, the listener dies, or (on a
//! replica) the master link breaks. Teardown then stops accepting, says
//! goodbye to the master, waits out any in-flight snapshot, and saves a
//! final snapshot if there are unsaved writes.

use crate::client::Client;
use crate::command::{Command, CommandCode};
use crate::error::ReadError;
use crate::event::Event;
use crate::keyspace::Keyspace;
use crate::master::{Master, MasterHandle};
use crate::response::Response;
use crate::snapshot;
use crate::stats::{ConnectionInfo, Device, Direction, IoData, IoStatistics, IoStats, ServerRole, ServerStats};
use anyhow::Context;
use chrono::Timelike;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default cap on concurrently registered clients.
pub const MAX_CLIENTS_ALLOWED: usize = 512;

/// Startup configuration, normally built from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub replicate: bool,
    pub source_address: String,
    pub snapshot: PathBuf,
    pub max_clients: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            replicate: false,
            source_address: crate::DEFAULT_MASTER.to_string(),
            snapshot: PathBuf::from(crate::DEFAULT_SNAPSHOT),
            max_clients: MAX_CLIENTS_ALLOWED,
        }
    }
}

/// The whole server. Construct, [`Server::bind`], then [`Server::run`].
pub struct Server {
    host: String,
    port: u16,
    keyspace: Keyspace,
    clients: HashMap<String, Client>,
    replicas: HashSet<String>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    listener: Option<TcpListener>,
    listener_task: Option<JoinHandle<()>>,
    client_count: Arc<AtomicUsize>,
    max_clients: usize,
    snap_file: PathBuf,
    snapshotting: Arc<RwLock<bool>>,
    replicate: bool,
    source_address: String,
    master: Option<MasterHandle>,
    next_id: u64,
    creation: Instant,
    statistics: IoStatistics,
    network: IoStats,
    disk: IoStats,
    event_count: u64,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            host: settings.host,
            port: settings.port,
            keyspace: Keyspace::new(),
            clients: HashMap::new(),
            replicas: HashSet::new(),
            events_tx,
            events_rx: Some(events_rx),
            listener: None,
            listener_task: None,
            client_count: Arc::new(AtomicUsize::new(0)),
            max_clients: settings.max_clients,
            snap_file: settings.snapshot,
            snapshotting: Arc::new(RwLock::new(false)),
            replicate: settings.replicate,
            source_address: settings.source_address,
            master: None,
            next_id: client_id_seed(),
            creation: Instant::now(),
            statistics: IoStatistics::new(),
            network: IoStats::default(),
            disk: IoStats::default(),
            event_count: 0,
        }
    }

    /// Opens the listening socket and returns the bound address.
    pub async fn bind(&mut self) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("error listening on {}:{}", self.host, self.port))?;
        let addr = listener.local_addr()?;
        info!(host = %self.host, port = addr.port(), "Listening for new connections");
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Loads the initial dataset, spawns the background tasks, and runs
    /// the event loop until shutdown.
    pub async fn run(mut self) -> anyhow::Result<()> {
        if self.replicate {
            self.bootstrap_from_master().await?;
        } else {
            snapshot::load(&mut self.keyspace, &self.snap_file).await?;
        }

        let listener = self
            .listener
            .take()
            .context("bind() must be called before run()")?;
        self.creation = Instant::now();

        self.listener_task = Some(tokio::spawn(listen(
            listener,
            self.events_tx.clone(),
            Arc::clone(&self.client_count),
            self.max_clients,
        )));
        tokio::spawn(watch_signals(self.events_tx.clone()));
        tokio::spawn(pacemaker(self.events_tx.clone()));

        let events = self.events_rx.take().context("run() called twice")?;
        self.event_loop(events).await;
        Ok(())
    }

    async fn event_loop(&mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.event_count += 1;
            if event.exec(self).await {
                break;
            }
        }

        self.tear_down().await;
    }

    async fn tear_down(&mut self) {
        warn!(events = self.event_count, "Tear down");

        if let Some(task) = self.listener_task.take() {
            task.abort();
        }

        if let Some(master) = self.master.take() {
            master.close().await;
        }

        self.wait_for_snapshot().await;
        if self.must_save() {
            warn!("Snapshotting before exit");
            let items = self.keyspace.items();
            snapshot::write(&items, &self.snap_file, &self.events_tx).await;
        }
    }

    async fn bootstrap_from_master(&mut self) -> anyhow::Result<()> {
        let mut master = Master::connect(&self.source_address).await?;
        master.sync(&mut self.keyspace).await?;
        self.master = Some(master.follow(self.events_tx.clone()));
        Ok(())
    }

    // -- event handlers, called from Event::exec ------------------------

    pub(crate) fn register_client(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_client_id();
        info!(client = %id, address = %addr, "New client");
        let client = Client::spawn(id.clone(), stream, addr, self.events_tx.clone());
        self.clients.insert(id, client);
        self.client_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) async fn handle_command(&mut self, client_id: &str, command: Command) {
        if self.replicate && !command.can_run_on_replica() {
            let response = Response::error("this instance is a read replica (read-only)", true);
            self.enqueue_reply(client_id, response).await;
            return;
        }

        let is_write = command.is_write();
        let response = self.run_command(&command, Some(client_id));
        self.enqueue_reply(client_id, response).await;

        if is_write {
            self.broadcast(&command).await;
        }
    }

    /// Runs a command received over the master link. No reply, no
    /// broadcast: this side is the end of the line.
    pub(crate) fn run_source_command(&mut self, command: Command) {
        let _ = self.run_command(&command, None);
    }

    pub(crate) async fn handle_reading_error(&mut self, client_id: &str, error: ReadError) {
        if error.is_eof() {
            warn!(client = %client_id, "Client closed connection (EOF before EXIT)");
        } else {
            error!(client = %client_id, error = %error, "Error reading from client");
        }

        if error.is_technical() {
            self.disconnect(client_id);
        } else {
            let response = Response::error(error.to_string(), error.is_fatal());
            self.enqueue_reply(client_id, response).await;
        }
    }

    pub(crate) fn disconnect(&mut self, client_id: &str) {
        if let Some(client) = self.clients.remove(client_id) {
            self.replicas.remove(client_id);
            self.client_count.fetch_sub(1, Ordering::Relaxed);
            if client.is_replica() {
                warn!(client = %client_id, "Replica disconnected");
            } else {
                info!(client = %client_id, "Client disconnected");
            }
        }
    }

    pub(crate) fn heartbeat(&mut self, beat: u64) {
        self.keyspace.evict();
        let (network, disk) = self.statistics.analyze();
        self.network = network;
        self.disk = disk;

        if beat % 100 == 0 && self.must_save() {
            let items = self.keyspace.items();
            self.keyspace.wash_clean();
            self.set_snapshotting(true);
            snapshot::dispatch(
                items,
                self.snap_file.clone(),
                self.events_tx.clone(),
                Arc::clone(&self.snapshotting),
            );
        }
    }

    pub(crate) fn account_for(&mut self, device: Device, direction: Direction, data: IoData) {
        self.statistics.add(device, direction, data);
    }

    /// Best-effort rejection of a connection above the client cap.
    pub(crate) async fn refuse_connection(&mut self, mut stream: TcpStream) {
        let message = format!("-ERR too many connections (limit {})\r\n", self.max_clients);
        let _ = stream.write_all(message.as_bytes()).await;
    }

    // -- command runners ------------------------------------------------

    fn run_command(&mut self, command: &Command, client_id: Option<&str>) -> Response {
        match command.code() {
            CommandCode::Get => match self.keyspace.get(command.key()) {
                Some(item) => Response::string(item.value().clone()),
                None => Response::error(format!("Key \"{}\" not found", command.key()), false),
            },
            CommandCode::Set => {
                self.keyspace.set(
                    command.key().to_string(),
                    command.value().clone(),
                    command.expiration(),
                );
                Response::ok()
            }
            CommandCode::Rm => {
                self.keyspace.rm(command.key());
                Response::ok()
            }
            CommandCode::Rmall => {
                self.keyspace.rmall();
                Response::ok()
            }
            CommandCode::Stats => Response::json(&self.build_stats()),
            CommandCode::List => Response::json(&self.keyspace.keys()),
            CommandCode::Ping => Response::pong(),
            CommandCode::Exit => Response::bye(),
            CommandCode::Sync => self.run_sync(client_id),
        }
    }

    /// Turns the issuing connection into a replica and hands back the
    /// whole dataset.
    ///
    /// This runs on the loop, so the items snapshot is consistent with
    /// the broadcast stream that follows: no write can be dispatched to
    /// the new replica before the sync response is queued.
    fn run_sync(&mut self, client_id: Option<&str>) -> Response {
        let Some(id) = client_id else {
            // Only real connections can become replicas.
            return Response::error("SYNC is not valid on this link", false);
        };

        let items = self.keyspace.items();
        if let Some(client) = self.clients.get_mut(id) {
            client.mark_replica();
            self.replicas.insert(id.to_string());
            info!(client = %id, address = %client.addr(), "New read replica");
        }
        Response::Sync(items)
    }

    // -- plumbing -------------------------------------------------------

    async fn enqueue_reply(&mut self, client_id: &str, response: Response) {
        let Some(client) = self.clients.get(client_id) else {
            return;
        };
        if client.enqueue_reply(response).await.is_err() {
            self.disconnect(client_id);
        }
    }

    /// Mirrors a committed write to every registered replica, in commit
    /// order.
    async fn broadcast(&mut self, command: &Command) {
        if self.replicas.is_empty() {
            return;
        }
        let targets: Vec<String> = self.replicas.iter().cloned().collect();
        for id in targets {
            self.enqueue_reply(&id, Response::Broadcast(command.clone()))
                .await;
        }
    }

    fn build_stats(&self) -> ServerStats {
        let connections: Vec<ConnectionInfo> =
            self.clients.values().map(Client::summarize).collect();
        ServerStats {
            role: if self.replicate {
                ServerRole::ReadReplica
            } else {
                ServerRole::Master
            },
            uptime: self.creation.elapsed().as_secs(),
            disk: self.disk,
            network: self.network,
            keys: self.keyspace.count(),
            replicas: self.replicas.len(),
            connections,
        }
    }

    fn next_client_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    fn must_save(&self) -> bool {
        !self.replicate && self.keyspace.is_dirty() && !self.is_snapshotting()
    }

    fn is_snapshotting(&self) -> bool {
        *self.snapshotting.read().unwrap()
    }

    fn set_snapshotting(&self, value: bool) {
        *self.snapshotting.write().unwrap() = value;
    }

    async fn wait_for_snapshot(&self) {
        while self.is_snapshotting() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Seeds the client-id counter with the hour of day, scaled. Not unique
/// across restarts within the same hour; ids are for log correlation, not
/// identity.
fn client_id_seed() -> u64 {
    chrono::Local::now().hour() as u64 * 1000
}

/// The accept loop. Runs until the listener errors out.
async fn listen(
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    client_count: Arc<AtomicUsize>,
    max_clients: usize,
) {
    loop {
        match listener.accept().await {
            Err(error) => {
                let _ = events.send(Event::AcceptError(error));
                return;
            }
            Ok((stream, addr)) => {
                if client_count.load(Ordering::Relaxed) >= max_clients {
                    let _ = events.send(Event::ConnectionLimitReached(stream));
                } else {
                    info!(address = %addr, "New connection accepted");
                    let _ = events.send(Event::NewConnection { stream, addr });
                }
            }
        }
    }
}

/// The 1 Hz heartbeat source. Beats are numbered from 1; the loop uses
/// every 100th as the snapshot checkpoint.
async fn pacemaker(events: mpsc::UnboundedSender<Event>) {
    let mut beat: u64 = 1;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if events.send(Event::Heartbeat(beat)).is_err() {
            return;
        }
        beat += 1;
    }
}

/// Waits for SIGINT or SIGTERM and posts the stop event.
async fn watch_signals(events: mpsc::UnboundedSender<Event>) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    let _ = events.send(Event::Signal);
}
