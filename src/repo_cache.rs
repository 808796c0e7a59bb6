//! Time-bounded cache of repository entries.
//!
//! Repository registrations change rarely but are consulted on every
//! resolution, so entries are served from memory for a configurable
//! window. An expired record is never returned; it stays in the map until
//! the background sweep physically removes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::metadata::RepositoryEntry;

struct Record {
    entry: RepositoryEntry,
    expires_at: Instant,
}

/// Shared map of repository name to entry, bounded by a per-entry TTL.
///
/// Safe for concurrent use from multiple resolution tasks; entries are
/// immutable once inserted, so a plain map behind a read/write lock is
/// all the synchronization required.
pub struct RepoCache {
    ttl: Duration,
    records: RwLock<HashMap<String, Record>>,
}

impl RepoCache {
    /// A cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// The unexpired entry for `name`, if present.
    pub async fn get(&self, name: &str) -> Option<RepositoryEntry> {
        let records = self.records.read().await;
        records
            .get(name)
            .filter(|record| record.expires_at > Instant::now())
            .map(|record| record.entry.clone())
    }

    /// Insert `entry` under `name` with a fresh expiry.
    pub async fn insert(&self, name: impl Into<String>, entry: RepositoryEntry) {
        let record = Record {
            entry,
            expires_at: Instant::now() + self.ttl,
        };
        self.records.write().await.insert(name.into(), record);
    }

    /// Remove records past their expiry.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.records
            .write()
            .await
            .retain(|_, record| record.expires_at > now);
    }

    /// Number of physically present records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when no records are physically present.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Spawn the background sweep that removes expired records every
    /// `every`. The caller owns the handle; aborting it stops the sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.purge_expired().await;
            }
        })
    }
}
