//! I/O Accounting and the STATS Payload
//!
//! Every read and write in the server yields an [`IoData`] record (bytes
//! moved, calls made). Client tasks and the snapshot job post these to the
//! event loop, which routes them into an [`IoStatistics`] accumulator keyed
//! by device (network or disk) and direction (input or output).
//!
//! Once per heartbeat the loop calls [`IoStatistics::analyze`], which turns
//! the raw accumulators into per-second averages and resets them. The STATS
//! command serializes the last rollup as JSON via [`ServerStats`].

use serde::Serialize;
use std::time::Instant;

/// Which hardware a piece of I/O touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Disk,
    Network,
}

/// Which way the bytes moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Byte and call counters for one batch of I/O.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoData {
    pub bytes: usize,
    pub calls: usize,
}

impl IoData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts one I/O call. Zero-byte calls are not counted.
    pub fn add(&mut self, bytes: usize) {
        self.bytes += bytes;
        if bytes > 0 {
            self.calls += 1;
        }
    }

    /// Folds another batch into this one.
    pub fn merge(&mut self, other: IoData) {
        self.bytes += other.bytes;
        self.calls += other.calls;
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0 && self.calls == 0
    }
}

/// Per-device counters split by direction, as exposed in the STATS payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoStats {
    #[serde(rename = "in")]
    pub bytes_in: usize,
    #[serde(rename = "out")]
    pub bytes_out: usize,
    pub reads: usize,
    pub writes: usize,
}

impl IoStats {
    fn record(&mut self, direction: Direction, data: IoData) {
        match direction {
            Direction::Input => {
                self.bytes_in += data.bytes;
                self.reads += data.calls;
            }
            Direction::Output => {
                self.bytes_out += data.bytes;
                self.writes += data.calls;
            }
        }
    }

    fn average(&mut self, secs: u64) {
        let secs = secs as usize;
        self.bytes_in /= secs;
        self.bytes_out /= secs;
        self.reads /= secs;
        self.writes /= secs;
    }
}

/// Rolling accumulator of I/O counters since the last analyze call.
#[derive(Debug)]
pub struct IoStatistics {
    network: IoStats,
    disk: IoStats,
    last_measurement: Instant,
}

impl Default for IoStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl IoStatistics {
    pub fn new() -> Self {
        Self {
            network: IoStats::default(),
            disk: IoStats::default(),
            last_measurement: Instant::now(),
        }
    }

    /// Routes one accounting batch into the right device counter.
    pub fn add(&mut self, device: Device, direction: Direction, data: IoData) {
        match device {
            Device::Network => self.network.record(direction, data),
            Device::Disk => self.disk.record(direction, data),
        }
    }

    /// Converts the accumulators into per-second averages, resets them, and
    /// returns `(network, disk)`.
    ///
    /// The elapsed time is clamped to at least one second, so back-to-back
    /// calls report raw totals instead of dividing by zero.
    pub fn analyze(&mut self) -> (IoStats, IoStats) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_measurement).as_secs().max(1);
        self.network.average(elapsed);
        self.disk.average(elapsed);
        let result = (self.network, self.disk);
        self.network = IoStats::default();
        self.disk = IoStats::default();
        self.last_measurement = now;
        result
    }
}

/// The role this process plays, as reported by STATS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerRole {
    #[serde(rename = "MASTER")]
    Master,
    #[serde(rename = "READ_REPLICA")]
    ReadReplica,
}

/// One connected client, as reported by STATS.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub address: String,
    pub network: IoStats,
}

/// The full STATS payload.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub role: ServerRole,
    pub uptime: u64,
    pub disk: IoStats,
    pub network: IoStats,
    pub keys: usize,
    pub replicas: usize,
    pub connections: Vec<ConnectionInfo>,
}
