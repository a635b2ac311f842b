//! Peer Store Storage (RocksDB)
//!
//! Persistent storage for peer rows and the sweep lease.
//! Survives monitor restarts so counters and availability carry over.

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{CountEntry, LeaseRecord, PeerStats, PeerTransaction};
use crate::error::StoreError;
use crate::types::{PeerRecord, PeerState, PeerVersion};

/// Key prefixes for different data types
const PREFIX_PEER: &[u8] = b"peer:";
const PREFIX_LOCK: &[u8] = b"lock:";

/// Reward state of rows that duplicate another reward claimant
const REWARD_DUPLICATE: &str = "Duplicate";

/// Peer store backed by RocksDB
pub struct PeerStore {
    /// RocksDB instance
    db: DB,

    /// Committed rows, keyed by announced address
    cache: HashMap<String, PeerRecord>,

    /// Bumped on every commit
    generation: u64,
}

impl PeerStore {
    /// Open or create a peer store at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(100);
        opts.set_keep_log_file_num(3);

        let db = DB::open(&opts, path).map_err(|e| StoreError::Open(e.to_string()))?;

        let mut cache = HashMap::new();
        let iter = db.iterator(IteratorMode::From(PREFIX_PEER, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Read(e.to_string()))?;

            if !key.starts_with(PREFIX_PEER) {
                break;
            }

            match bincode::deserialize::<PeerRecord>(&value) {
                Ok(record) => {
                    cache.insert(record.announced_address.clone(), record);
                }
                Err(e) => warn!(
                    "Skipping unreadable peer row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }

        info!("📦 Loaded {} peers from store", cache.len());

        Ok(Self {
            db,
            cache,
            generation: 0,
        })
    }

    // === Read-only queries ===

    pub fn get(&self, address: &str) -> Option<&PeerRecord> {
        self.cache.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.cache.contains_key(address)
    }

    pub fn find_by_state(&self, state: PeerState) -> Vec<&PeerRecord> {
        self.cache.values().filter(|p| p.state == state).collect()
    }

    pub fn count_by_state(&self, state: PeerState) -> usize {
        self.cache.values().filter(|p| p.state == state).count()
    }

    pub fn total_count(&self) -> usize {
        self.cache.len()
    }

    /// All rows by version (newest first), state, availability (highest first), address
    pub fn list(&self) -> Vec<&PeerRecord> {
        let mut peers: Vec<_> = self.cache.values().collect();
        peers.sort_by(|a, b| {
            compare_versions_desc(&a.version, &b.version)
                .then_with(|| a.state.cmp(&b.state))
                .then_with(|| b.availability.total_cmp(&a.availability))
                .then_with(|| a.announced_address.cmp(&b.announced_address))
        });
        peers
    }

    /// Aggregate counts for dashboards
    pub fn stats(&self) -> PeerStats {
        let online: Vec<_> = self.find_by_state(PeerState::Online);

        let by_state = PeerState::ALL
            .iter()
            .map(|state| CountEntry {
                key: state.to_string(),
                count: self.count_by_state(*state),
            })
            .filter(|entry| entry.count > 0)
            .collect();

        let mut online_by_version = count_by(online.iter().map(|p| p.version.as_str()));
        online_by_version.sort_by(|a, b| {
            compare_versions_desc(&a.key, &b.key).then_with(|| b.count.cmp(&a.count))
        });

        let online_by_platform = count_by(
            online
                .iter()
                .filter(|p| p.reward_state.as_deref() != Some(REWARD_DUPLICATE))
                .map(|p| p.platform.as_str()),
        );

        let online_by_country = count_by(online.iter().map(|p| p.country_code.as_str()));

        PeerStats {
            total_peers: self.cache.len(),
            online_peers: online.len(),
            by_state: sorted_by_count(by_state),
            online_by_version,
            online_by_platform: sorted_by_count(online_by_platform),
            online_by_country: sorted_by_count(online_by_country),
            last_check: self.last_check(),
        }
    }

    /// Time of the most recent row modification
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.cache.values().map(|p| p.modified_at).max()
    }

    // === Transactions ===

    /// Start staging mutations against the current rows
    pub fn transaction(&self) -> PeerTransaction {
        PeerTransaction::new(self.generation, self.cache.clone())
    }

    /// Write every staged change in one batch, then publish the new rows
    pub fn commit(&mut self, tx: PeerTransaction) -> Result<usize, StoreError> {
        if tx.base_generation != self.generation {
            return Err(StoreError::Write(format!(
                "transaction started at generation {} but store is at {}",
                tx.base_generation, self.generation
            )));
        }

        let mut batch = WriteBatch::default();

        for address in &tx.dirty {
            if let Some(record) = tx.rows.get(address) {
                batch.put(peer_key(address), bincode::serialize(record)?);
            }
        }
        for address in &tx.deleted {
            batch.delete(peer_key(address));
        }

        let written = tx.dirty.len() + tx.deleted.len();
        if written > 0 {
            self.db.write(batch)?;
        }

        self.cache = tx.rows;
        self.generation += 1;

        debug!("Committed {} peer row changes", written);
        Ok(written)
    }

    // === Lease records ===

    pub fn lease(&self, key: &str) -> Result<Option<LeaseRecord>, StoreError> {
        let value = self
            .db
            .get(lock_key(key))
            .map_err(|e| StoreError::Read(e.to_string()))?;

        match value {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_lease(&self, key: &str, lease: &LeaseRecord) -> Result<(), StoreError> {
        self.db.put(lock_key(key), bincode::serialize(lease)?)?;
        Ok(())
    }

    pub fn delete_lease(&self, key: &str) -> Result<(), StoreError> {
        self.db.delete(lock_key(key))?;
        Ok(())
    }

    /// Flush all changes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Create storage key for a peer
fn peer_key(address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_PEER.len() + address.len());
    key.extend_from_slice(PREFIX_PEER);
    key.extend_from_slice(address.as_bytes());
    key
}

fn lock_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_LOCK.len() + name.len());
    key.extend_from_slice(PREFIX_LOCK);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Newest parseable version first, unparseable strings last
fn compare_versions_desc(a: &str, b: &str) -> Ordering {
    let key = |v: &str| (v.parse::<PeerVersion>().ok(), v.to_string());
    key(b).cmp(&key(a))
}

fn count_by<'a>(values: impl Iterator<Item = &'a str>) -> Vec<CountEntry> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| CountEntry {
            key: key.to_string(),
            count,
        })
        .collect()
}

fn sorted_by_count(mut entries: Vec<CountEntry>) -> Vec<CountEntry> {
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries
}
