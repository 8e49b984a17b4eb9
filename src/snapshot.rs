//! Snapshot Save and Load
//!
//! Persistence is just the wire protocol pointed at a file: a comment
//! header line, then one array-form SET per item. Loading replays the
//! file through the regular parser, so the snapshot format and the
//! network format can never drift apart.
//!
//! Saving happens off the event loop. The loop captures an item list,
//! clears the dirty flag, raises the snapshotting flag, and dispatches a
//! job; the job writes to a temp file next to the target and atomically
//! renames it over the old snapshot. A half-written snapshot can never be
//! observed.
//!
//! Transient items are not persisted. A TTL measured against a dead
//! process is meaningless, so only permanent items survive a restart.
//! Snapshot I/O failures are fatal for the whole process: a server that
//! cannot persist must not pretend it can.

use crate::command::CommandCode;
use crate::error::ReadError;
use crate::event::Event;
use crate::keyspace::{Item, Keyspace};
use crate::protocol::{Parser, Sink, Source, FILE_SINK_THRESHOLD, FILE_SOURCE_BUFFER};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Spawns a snapshot job. The caller has already raised the snapshotting
/// flag; the job lowers it when it finishes.
pub fn dispatch(
    items: Vec<Item>,
    snap_file: PathBuf,
    events: mpsc::UnboundedSender<Event>,
    snapshotting: Arc<RwLock<bool>>,
) {
    tokio::spawn(async move {
        write(&items, &snap_file, &events).await;
        *snapshotting.write().unwrap() = false;
    });
}

/// Writes a snapshot of `items` to `snap_file` via a temp file and an
/// atomic rename.
///
/// Exits the process on any I/O failure; the temp file is removed on the
/// way out.
pub async fn write(items: &[Item], snap_file: &Path, events: &mpsc::UnboundedSender<Event>) {
    let start = Instant::now();
    let tmp = temp_path(snap_file);

    info!(snapshot = %snap_file.display(), tmp = %tmp.display(), "Creating snapshot");

    if let Err(err) = write_through_temp(items, &tmp, snap_file, events).await {
        error!(error = %err, "Error writing snapshot");
        let _ = tokio::fs::remove_file(&tmp).await;
        std::process::exit(crate::EXIT_FAILURE);
    }

    info!(
        snapshot = %snap_file.display(),
        duration = ?start.elapsed(),
        "Snapshot is done"
    );
}

async fn write_through_temp(
    items: &[Item],
    tmp: &Path,
    snap_file: &Path,
    events: &mpsc::UnboundedSender<Event>,
) -> std::io::Result<()> {
    let file = tokio::fs::File::create(tmp).await?;
    let mut sink = Sink::new(file, FILE_SINK_THRESHOLD);

    let header = format!(
        "# aetherg {} snapshot {}\n",
        crate::VERSION,
        chrono::Local::now().to_rfc3339()
    );
    sink.write(header.as_bytes());

    for item in items {
        if item.is_transient() {
            continue; // Transient items must not be persisted
        }
        sink.write_array_of_protocol_strings(&item.set_command_pieces());
        if sink.full() {
            let data = sink.flush().await?;
            let _ = events.send(Event::disk_write(data));
        }
    }

    let data = sink.flush().await?;
    let _ = events.send(Event::disk_write(data));

    tokio::fs::rename(tmp, snap_file).await
}

fn temp_path(snap_file: &Path) -> PathBuf {
    let dir = snap_file.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("aetherg-{}.tmp", std::process::id()))
}

/// Loads a snapshot into the keyspace at startup.
///
/// A missing file is a clean start. Anything in the file other than SET
/// commands is a fatal startup error, as is any read failure short of a
/// clean EOF.
pub async fn load(keyspace: &mut Keyspace, snap_file: &Path) -> anyhow::Result<()> {
    if !snap_file.exists() {
        info!(snapshot = %snap_file.display(), "No snapshot file to load");
        return Ok(());
    }

    info!(snapshot = %snap_file.display(), "Loading snapshot file");

    let file = tokio::fs::File::open(snap_file)
        .await
        .with_context(|| format!("error opening snapshot file {}", snap_file.display()))?;
    let mut parser = Parser::new(Source::new(file, FILE_SOURCE_BUFFER));

    loop {
        match parser.next().await {
            Ok(command) if command.code() == CommandCode::Set => {
                keyspace.set(
                    command.key().to_string(),
                    command.value().clone(),
                    command.expiration(),
                );
            }
            Ok(command) => {
                anyhow::bail!("invalid command {} in snapshot file", command.code());
            }
            Err(ReadError::Eof) => {
                info!("Snapshot loaded (EOF reached)");
                keyspace.wash_clean();
                return Ok(());
            }
            Err(err) => {
                return Err(err).context("error reading snapshot file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn events() -> mpsc::UnboundedSender<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        tx
    }

    #[tokio::test]
    async fn test_round_trip_keeps_only_permanent_items() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("test.snap");

        let mut original = Keyspace::new();
        original.set("permanent".to_string(), Bytes::from_static(b"stays"), 0);
        original.set("session".to_string(), Bytes::from_static(b"fades"), 3600);

        write(&original.items(), &snap, &events()).await;

        let mut reloaded = Keyspace::new();
        load(&mut reloaded, &snap).await.unwrap();

        assert_eq!(reloaded.count(), 1);
        assert_eq!(
            reloaded.get("permanent").unwrap().value(),
            &Bytes::from_static(b"stays")
        );
        assert!(reloaded.get("session").is_none());
        assert!(!reloaded.is_dirty());
    }

    #[tokio::test]
    async fn test_snapshot_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("test.snap");

        let mut ks = Keyspace::new();
        ks.set("k".to_string(), Bytes::from_static(b"v"), 0);
        write(&ks.items(), &snap, &events()).await;

        let contents = tokio::fs::read(&snap).await.unwrap();
        let text = String::from_utf8(contents).unwrap();

        let mut lines = text.splitn(2, '\n');
        assert!(lines.next().unwrap().starts_with("# aetherg"));
        assert_eq!(lines.next().unwrap(), "*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");

        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != snap)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_clean_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = Keyspace::new();
        load(&mut ks, &dir.path().join("nope.snap")).await.unwrap();
        assert_eq!(ks.count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_loads_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("empty.snap");
        tokio::fs::write(&snap, b"").await.unwrap();

        let mut ks = Keyspace::new();
        load(&mut ks, &snap).await.unwrap();
        assert_eq!(ks.count(), 0);
    }

    #[tokio::test]
    async fn test_header_only_file_loads_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("header.snap");
        tokio::fs::write(&snap, b"# aetherg snapshot header\n").await.unwrap();

        let mut ks = Keyspace::new();
        load(&mut ks, &snap).await.unwrap();
        assert_eq!(ks.count(), 0);
    }

    #[tokio::test]
    async fn test_non_set_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("bad.snap");
        tokio::fs::write(&snap, b"PING\n").await.unwrap();

        let mut ks = Keyspace::new();
        let err = load(&mut ks, &snap).await.unwrap_err();
        assert!(err.to_string().contains("invalid command"));
    }
}
