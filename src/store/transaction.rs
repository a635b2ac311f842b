//! Staged store mutations
//!
//! A transaction works on a private copy of the store's rows and remembers
//! which keys it touched. Nothing is visible to readers until
//! `PeerStore::commit`; dropping the transaction discards every change.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::types::{PeerRecord, PeerState};

/// Uncommitted view of the peer rows
#[derive(Debug)]
pub struct PeerTransaction {
    /// Store generation this transaction was started from
    pub(super) base_generation: u64,

    pub(super) rows: HashMap<String, PeerRecord>,
    pub(super) dirty: HashSet<String>,
    pub(super) deleted: HashSet<String>,
}

impl PeerTransaction {
    pub(super) fn new(base_generation: u64, rows: HashMap<String, PeerRecord>) -> Self {
        Self {
            base_generation,
            rows,
            dirty: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    pub fn get(&self, address: &str) -> Option<&PeerRecord> {
        self.rows.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.rows.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether committing would write anything
    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty()
    }

    pub fn find_by_state(&self, state: PeerState) -> Vec<&PeerRecord> {
        self.rows.values().filter(|p| p.state == state).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.rows.values()
    }

    /// Insert a new row or replace the existing one
    pub fn upsert(&mut self, record: PeerRecord) {
        let address = record.announced_address.clone();
        self.deleted.remove(&address);
        self.dirty.insert(address.clone());
        self.rows.insert(address, record);
    }

    /// Apply `f` to every row
    pub fn update_all<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut PeerRecord),
    {
        for (address, record) in self.rows.iter_mut() {
            f(record);
            self.dirty.insert(address.clone());
        }
    }

    /// Apply `f` to the rows matching `predicate`, returning how many matched
    pub fn update_where<P, F>(&mut self, predicate: P, mut f: F) -> usize
    where
        P: Fn(&PeerRecord) -> bool,
        F: FnMut(&mut PeerRecord),
    {
        let mut updated = 0;
        for (address, record) in self.rows.iter_mut() {
            if predicate(record) {
                f(record);
                self.dirty.insert(address.clone());
                updated += 1;
            }
        }
        updated
    }

    pub fn delete(&mut self, address: &str) -> bool {
        if self.rows.remove(address).is_none() {
            return false;
        }
        self.dirty.remove(address);
        self.deleted.insert(address.to_string());
        true
    }

    /// Delete the rows matching `predicate`, returning the removed addresses
    pub fn delete_where<P>(&mut self, predicate: P) -> Vec<String>
    where
        P: Fn(&PeerRecord) -> bool,
    {
        let doomed: Vec<String> = self
            .rows
            .values()
            .filter(|&p| predicate(p))
            .map(|p| p.announced_address.clone())
            .collect();

        for address in &doomed {
            self.delete(address);
        }

        doomed
    }

    /// Delete rows that have not been online for `max_age`
    pub fn delete_older_than(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        self.delete_where(|p| p.is_stale(now, max_age))
    }
}
