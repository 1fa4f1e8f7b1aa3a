//! In-memory directory of tailnet names.
//!
//! A [`Directory`] is one complete snapshot mapping canonical keys (the
//! lowercased left-most label of a name) to the addresses and aliases known
//! for that key. Snapshots are built off to the side and handed to a
//! [`DirectoryStore`], which swaps them in as a unit. Readers always see one
//! whole snapshot.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;

use crate::metrics;

/// Reduce a query name to its directory key.
///
/// Strips the trailing dot, keeps the left-most label and folds it to
/// lowercase. Returns `None` for names with an empty first label, which the
/// resolver treats as a miss.
pub fn canonical_key(name: &str) -> Option<String> {
    let name = name.trim_end_matches('.');
    let label = name.split('.').next().unwrap_or_default();
    if label.is_empty() {
        return None;
    }
    Some(label.to_ascii_lowercase())
}

/// Records known for a single key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    /// IPv4 addresses, in source order.
    pub v4: Vec<Ipv4Addr>,
    /// IPv6 addresses, in source order.
    pub v6: Vec<Ipv6Addr>,
    /// Fully-qualified alias targets, in source order.
    pub aliases: Vec<String>,
}

impl RecordSet {
    /// True when the set carries no addresses and no aliases.
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty() && self.aliases.is_empty()
    }
}

/// One complete name → record set snapshot.
///
/// Mutable only while it is being built. Once handed to
/// [`DirectoryStore::publish`] it is shared behind an `Arc` and never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: HashMap<String, RecordSet>,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an IPv4 address to `name`'s entry.
    pub fn add_v4(&mut self, name: &str, addr: Ipv4Addr) {
        if let Some(entry) = self.entry(name) {
            entry.v4.push(addr);
        }
    }

    /// Append an IPv6 address to `name`'s entry.
    pub fn add_v6(&mut self, name: &str, addr: Ipv6Addr) {
        if let Some(entry) = self.entry(name) {
            entry.v6.push(addr);
        }
    }

    /// Append an alias target to `name`'s entry.
    pub fn add_alias(&mut self, name: &str, target: impl Into<String>) {
        if let Some(entry) = self.entry(name) {
            entry.aliases.push(target.into());
        }
    }

    fn entry(&mut self, name: &str) -> Option<&mut RecordSet> {
        let key = canonical_key(name)?;
        Some(self.entries.entry(key).or_default())
    }

    /// Exact lookup by canonical key.
    pub fn get(&self, key: &str) -> Option<&RecordSet> {
        self.entries.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the directory has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys carrying at least one alias.
    pub fn alias_count(&self) -> usize {
        self.entries
            .values()
            .filter(|set| !set.aliases.is_empty())
            .count()
    }
}

/// Thread-safe holder of the current directory snapshot.
///
/// Cloning the store is cheap and every clone shares the same snapshot.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    inner: Arc<RwLock<Published>>,
}

#[derive(Debug)]
struct Published {
    directory: Arc<Directory>,

    /// SOA serial, advanced only when a publish changes content.
    serial: u32,

    /// True once the first snapshot has been published.
    ready: bool,
}

impl Default for DirectoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryStore {
    /// Create a store holding an empty, not-yet-ready directory.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Published {
                directory: Arc::new(Directory::new()),
                serial: 0,
                ready: false,
            })),
        }
    }

    /// Install `directory` as the current snapshot.
    ///
    /// Returns `true` if the content differed from the current snapshot. An
    /// identical snapshot leaves the serial and the current `Arc` untouched.
    pub fn publish(&self, directory: Directory) -> bool {
        let current = self.snapshot();
        if *current == directory {
            self.inner.write().ready = true;
            debug!(entries = directory.len(), "directory unchanged");
            metrics::record_publish(false);
            return false;
        }

        let entries = directory.len();
        let next = Arc::new(directory);
        let (previous, serial) = {
            let mut inner = self.inner.write();
            let previous = std::mem::replace(&mut inner.directory, next);
            inner.serial = inner.serial.wrapping_add(1);
            inner.ready = true;
            (previous, inner.serial)
        };
        // Superseded snapshot is released outside the lock.
        drop(previous);

        debug!(entries, serial, "published directory");
        metrics::record_publish(true);
        true
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Directory> {
        self.inner.read().directory.clone()
    }

    /// Look up `key` in the current snapshot.
    pub fn lookup(&self, key: &str) -> Option<RecordSet> {
        self.snapshot().get(key).cloned()
    }

    /// Current SOA serial.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial
    }

    /// True once at least one snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    /// Number of keys in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// True when the current snapshot has no keys.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Emit current directory metrics.
    pub fn emit_metrics(&self) {
        let snapshot = self.snapshot();
        let inner = self.inner.read();
        metrics::record_directory(snapshot.len(), snapshot.alias_count(), inner.serial, inner.ready);
    }
}
