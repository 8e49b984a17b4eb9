//! The Keyspace
//!
//! A plain map from key to [`Item`] with three bits of bookkeeping bolted
//! on:
//!
//! - **Transient keys**: every key whose item carries a non-zero
//!   expiration is also tracked in a side set, so the once-a-second
//!   eviction sweep only scans keys that can actually expire.
//! - **Dirty flag**: set by every mutation, cleared right before a
//!   snapshot job is dispatched. Drives the snapshot policy.
//! - **TTL math**: an item's remaining time to live is its expiration
//!   minus its age. It goes negative once the item overstays; eviction
//!   removes it on the next sweep.
//!
//! No locking happens here. The event loop owns the one instance and is
//! the only writer; that single-consumer discipline is what makes the
//! command runners lock-free.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// One stored entry: key, value, expiration in seconds (0 = permanent),
/// and the instant it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: String,
    value: Bytes,
    expiration: u64,
    creation: Instant,
}

impl Item {
    fn new(key: String, value: Bytes, expiration: u64) -> Self {
        Self {
            key,
            value,
            expiration,
            creation: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// True when this item is subject to expiry.
    pub fn is_transient(&self) -> bool {
        self.expiration != 0
    }

    /// Seconds since the item was written.
    pub fn age(&self) -> u64 {
        self.creation.elapsed().as_secs()
    }

    /// Remaining seconds before expiry. Negative once overdue.
    pub fn time_to_live(&self) -> i64 {
        self.expiration as i64 - self.age() as i64
    }

    pub fn has_expired(&self) -> bool {
        self.time_to_live() <= 0
    }

    /// Encodes this item as the pieces of an array-form SET command.
    ///
    /// Transient items carry their *current* TTL, not the original
    /// expiration. A replica ingesting the stream restarts the clock at
    /// reception time, so the remaining lifetime is the honest value to
    /// ship.
    pub fn set_command_pieces(&self) -> Vec<Bytes> {
        let mut pieces = vec![
            Bytes::from_static(b"SET"),
            Bytes::copy_from_slice(self.key.as_bytes()),
            self.value.clone(),
        ];
        if self.is_transient() {
            pieces.push(Bytes::from_static(b"EXP"));
            pieces.push(Bytes::from(self.time_to_live().to_string()));
        }
        pieces
    }
}

/// The key-to-item map plus transient tracking and the dirty flag.
#[derive(Debug, Default)]
pub struct Keyspace {
    data: HashMap<String, Item>,
    transient_keys: HashSet<String>,
    dirty: bool,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Item> {
        self.data.get(key)
    }

    /// Inserts or overwrites unconditionally. Creation time is always
    /// refreshed, so re-setting a transient key restarts its clock.
    pub fn set(&mut self, key: String, value: Bytes, expiration: u64) {
        if expiration != 0 {
            self.transient_keys.insert(key.clone());
        } else {
            self.transient_keys.remove(&key);
        }
        self.data.insert(key.clone(), Item::new(key, value, expiration));
        self.dirty = true;
    }

    pub fn rm(&mut self, key: &str) {
        self.data.remove(key);
        self.transient_keys.remove(key);
        self.dirty = true;
    }

    pub fn rmall(&mut self) {
        self.data.clear();
        self.transient_keys.clear();
        self.dirty = true;
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// A point-in-time copy of every stored item.
    pub fn items(&self) -> Vec<Item> {
        self.data.values().cloned().collect()
    }

    /// Removes every transient item whose TTL ran out. Only the transient
    /// set is scanned, so a store full of permanent keys costs nothing.
    pub fn evict(&mut self) {
        let expired: Vec<String> = self
            .transient_keys
            .iter()
            .filter(|key| {
                self.data
                    .get(*key)
                    .is_some_and(|item| item.is_transient() && item.has_expired())
            })
            .cloned()
            .collect();

        for key in expired {
            self.rm(&key);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag. Called by the event loop right before it
    /// dispatches a snapshot, so writes landing during the snapshot dirty
    /// the store again.
    pub fn wash_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_get_rm() {
        let key = "F398BC5672A51D8D";
        let val = Bytes::from_static(b"71A79DF49BDC291E1578986A71929");

        let mut ks = Keyspace::new();
        ks.set(key.to_string(), val.clone(), 360);

        let item = ks.get(key).unwrap();
        assert_eq!(item.key(), key);
        assert_eq!(item.value(), &val);
        assert_eq!(item.expiration(), 360);
        assert!(item.is_transient());

        ks.rm(key);
        assert!(ks.get(key).is_none());
    }

    #[test]
    fn test_overwrite_refreshes_expiration_tracking() {
        let mut ks = Keyspace::new();
        ks.set("k".to_string(), Bytes::from_static(b"a"), 60);
        ks.set("k".to_string(), Bytes::from_static(b"b"), 0);

        // Permanent now, so eviction must never touch it.
        ks.evict();
        assert_eq!(ks.get("k").unwrap().value(), &Bytes::from_static(b"b"));
        assert!(!ks.get("k").unwrap().is_transient());
    }

    #[test]
    fn test_expired_keys_are_evicted() {
        let mut ks = Keyspace::new();
        ks.set("a".to_string(), Bytes::from_static(b"1"), 2);
        ks.set("b".to_string(), Bytes::from_static(b"2"), 2);

        std::thread::sleep(Duration::from_secs(3));
        ks.evict();

        assert!(ks.get("a").is_none());
        assert!(ks.get("b").is_none());
        assert_eq!(ks.count(), 0);
    }

    #[test]
    fn test_evict_leaves_live_keys_alone() {
        let mut ks = Keyspace::new();
        ks.set("live".to_string(), Bytes::from_static(b"1"), 3600);
        ks.set("forever".to_string(), Bytes::from_static(b"2"), 0);
        ks.evict();
        assert_eq!(ks.count(), 2);
    }

    #[test]
    fn test_rmall_clears_everything() {
        let mut ks = Keyspace::new();
        ks.set("a".to_string(), Bytes::from_static(b"1"), 0);
        ks.set("b".to_string(), Bytes::from_static(b"2"), 10);
        ks.rmall();
        assert_eq!(ks.count(), 0);
        assert!(ks.keys().is_empty());

        // The transient set is gone too: a fresh evict has nothing to scan.
        ks.evict();
        assert_eq!(ks.count(), 0);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut ks = Keyspace::new();
        assert!(!ks.is_dirty());

        ks.set("k".to_string(), Bytes::from_static(b"v"), 0);
        assert!(ks.is_dirty());

        ks.wash_clean();
        assert!(!ks.is_dirty());

        // Reads stay clean.
        let _ = ks.get("k");
        let _ = ks.keys();
        let _ = ks.items();
        assert!(!ks.is_dirty());

        ks.rm("k");
        assert!(ks.is_dirty());

        ks.wash_clean();
        ks.rmall();
        assert!(ks.is_dirty());
    }

    #[test]
    fn test_set_command_pieces_for_permanent_item() {
        let mut ks = Keyspace::new();
        ks.set("k".to_string(), Bytes::from_static(b"v"), 0);
        let pieces = ks.get("k").unwrap().set_command_pieces();
        assert_eq!(pieces, vec!["SET", "k", "v"]);
    }

    #[test]
    fn test_set_command_pieces_carry_current_ttl() {
        let mut ks = Keyspace::new();
        ks.set("k".to_string(), Bytes::from_static(b"v"), 360);
        let pieces = ks.get("k").unwrap().set_command_pieces();
        assert_eq!(pieces.len(), 5);
        assert_eq!(pieces[3], &b"EXP"[..]);
        // Fresh item: the remaining TTL still equals the full expiration.
        assert_eq!(pieces[4], &b"360"[..]);
    }
}
