//! Error types
//!
//! One enum per layer. Peer-level failures (`ProbeError`) are absorbed inside a
//! sweep; everything that reaches `SweepError` aborts the sweep without writes.

/// Errors reading the local ledger replica
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Not enough local blocks: need 3, found {0}")]
    NotEnoughBlocks(usize),

    #[error("Ledger request failed: {0}")]
    Request(String),

    #[error("Malformed ledger response: {0}")]
    Malformed(String),
}

/// Errors talking to a single peer
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Peer returned error: {0}")]
    Peer(String),

    #[error("Malformed peer response: {0}")]
    Malformed(String),

    #[error("Peer version too old: {0}")]
    OldVersion(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProbeError::Malformed(e.to_string())
        } else {
            ProbeError::Transport(e.to_string())
        }
    }
}

/// Errors from the persistent peer store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Write(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors from the sweep lease lock
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock storage error: {0}")]
    Store(#[from] StoreError),
}

/// Errors opening the offline geo database
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("Failed to open GeoIP database {path}: {reason}")]
    Open { path: String, reason: String },
}

/// Systemic failures that abort a sweep
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Local chain unavailable: {0}")]
    Chain(#[from] ChainError),

    #[error("Peer store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Sweep lock failure: {0}")]
    Lock(#[from] LockError),

    #[error("Reward feed failure: {0}")]
    RewardFeed(String),
}
