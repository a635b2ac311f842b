//! Peer Store Module
//!
//! Persists one `PeerRecord` per announced address in RocksDB.
//! Sweeps stage their mutations in a `PeerTransaction` and commit them
//! as a single batch; the presentation layer only reads.

mod storage;
mod transaction;

pub use storage::PeerStore;
pub use transaction::PeerTransaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bucket of an aggregate count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub key: String,
    pub count: usize,
}

/// Aggregate view for dashboards
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerStats {
    /// Rows in the store
    pub total_peers: usize,

    /// Rows currently online
    pub online_peers: usize,

    /// Rows per state, most common first
    pub by_state: Vec<CountEntry>,

    /// Online rows per version, newest first
    pub online_by_version: Vec<CountEntry>,

    /// Online rows per platform, most common first (reward duplicates excluded)
    pub online_by_platform: Vec<CountEntry>,

    /// Online rows per country, most common first
    pub online_by_country: Vec<CountEntry>,

    /// Most recent `modified_at`
    pub last_check: Option<DateTime<Utc>>,
}

/// Holder of the sweep lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
