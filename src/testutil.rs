//! Shared test fixtures: rows, snapshots, an in-memory ledger and a
//! scripted peer network.

use async_trait::async_trait;
use chrono::Utc;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::chain::{difficulty_to_decimal, Ledger, LedgerBlock};
use crate::error::{ChainError, ProbeError};
use crate::geo::CountryLookup;
use crate::p2p::PeerClient;
use crate::types::{
    CumulativeDifficultyResponse, PeerInfoResponse, PeerRecord, PeerSnapshot, PeerState,
};

pub fn snapshot(address: &str, height: u64) -> PeerSnapshot {
    PeerSnapshot {
        announced_address: address.to_string(),
        real_ip: Some("10.0.0.1".to_string()),
        platform: "linux".to_string(),
        application: "BRS".to_string(),
        version: "v3.8.0".to_string(),
        height,
        cumulative_difficulty: MemoryLedger::difficulty(height),
        country_code: "DE".to_string(),
        next_block_ids: vec![],
        last_online_at: Utc::now(),
    }
}

pub fn record(address: &str, state: PeerState, height: u64) -> PeerRecord {
    PeerRecord::from_snapshot(&snapshot(address, height), state, Utc::now())
}

// =============================================================================
// LEDGER
// =============================================================================

/// Ledger with blocks at heights `1..=tip`
pub struct MemoryLedger {
    tip: u64,
    height_lookups: AtomicUsize,
}

impl MemoryLedger {
    pub fn with_chain(tip: u64) -> Self {
        Self {
            tip,
            height_lookups: AtomicUsize::new(0),
        }
    }

    pub fn block_id(height: u64) -> u64 {
        1_000_000 + height
    }

    /// Decimal difficulty at `height`, wider than 64 bits
    pub fn difficulty(height: u64) -> String {
        difficulty_to_decimal(&Self::raw_difficulty(height))
    }

    fn raw_difficulty(height: u64) -> Vec<u8> {
        (BigUint::from(height) * BigUint::from(10u64).pow(20)).to_bytes_be()
    }

    fn block(height: u64) -> LedgerBlock {
        LedgerBlock {
            height,
            id: Self::block_id(height),
            cumulative_difficulty: Self::raw_difficulty(height),
        }
    }

    pub fn height_lookups(&self) -> usize {
        self.height_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn top_blocks(&self, count: usize) -> Result<Vec<LedgerBlock>, ChainError> {
        Ok((1..=self.tip).rev().take(count).map(Self::block).collect())
    }

    async fn cumulative_difficulty_at(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        self.height_lookups.fetch_add(1, Ordering::SeqCst);
        if height == 0 || height > self.tip {
            return Ok(None);
        }
        Ok(Some(Self::raw_difficulty(height)))
    }
}

/// Ledger that cannot be read
pub struct BrokenLedger;

#[async_trait]
impl Ledger for BrokenLedger {
    async fn top_blocks(&self, _count: usize) -> Result<Vec<LedgerBlock>, ChainError> {
        Err(ChainError::Request("connection refused".to_string()))
    }

    async fn cumulative_difficulty_at(&self, _height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        Err(ChainError::Request("connection refused".to_string()))
    }
}

// =============================================================================
// PEER NETWORK
// =============================================================================

/// Canned answers of one fake peer
#[derive(Debug, Clone)]
pub struct ScriptedPeer {
    pub info: Result<PeerInfoResponse, ProbeError>,
    pub peers: Result<Vec<String>, ProbeError>,
    pub difficulty: Result<CumulativeDifficultyResponse, ProbeError>,
    pub next_block_ids: Result<Vec<String>, ProbeError>,
}

impl ScriptedPeer {
    /// Peer at `height` on the `MemoryLedger` chain
    pub fn at_height(height: u64) -> Self {
        Self {
            info: Ok(PeerInfoResponse {
                announced_address: None,
                application: "BRS".to_string(),
                platform: "linux".to_string(),
                version: "v3.8.0".to_string(),
            }),
            peers: Ok(vec![]),
            difficulty: Ok(CumulativeDifficultyResponse {
                cumulative_difficulty: MemoryLedger::difficulty(height),
                blockchain_height: height,
            }),
            next_block_ids: Ok(vec![]),
        }
    }

    pub fn announcing(mut self, address: &str) -> Self {
        if let Ok(info) = self.info.as_mut() {
            info.announced_address = Some(address.to_string());
        }
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        if let Ok(info) = self.info.as_mut() {
            info.version = version.to_string();
        }
        self
    }

    pub fn with_peers(mut self, peers: &[&str]) -> Self {
        self.peers = Ok(peers.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn with_next_block_ids(mut self, ids: &[&str]) -> Self {
        self.next_block_ids = Ok(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn with_difficulty(mut self, difficulty: &str) -> Self {
        if let Ok(d) = self.difficulty.as_mut() {
            d.cumulative_difficulty = difficulty.to_string();
        }
        self
    }

    pub fn without_next_block_ids(mut self) -> Self {
        self.next_block_ids = Err(ProbeError::Peer("Unsupported request type!".to_string()));
        self
    }

    pub fn without_peer_list(mut self) -> Self {
        self.peers = Err(ProbeError::Transport("connection reset".to_string()));
        self
    }

    pub fn offline() -> Self {
        let down = ProbeError::Transport("connection refused".to_string());
        Self {
            info: Err(down.clone()),
            peers: Err(down.clone()),
            difficulty: Err(down.clone()),
            next_block_ids: Err(down),
        }
    }
}

/// Peer network made of scripted peers. Unknown addresses refuse connections.
#[derive(Default)]
pub struct ScriptedNetwork {
    peers: Mutex<HashMap<String, ScriptedPeer>>,
    info_calls: Mutex<HashMap<String, usize>>,
    next_block_requests: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: &str, peer: ScriptedPeer) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(address.to_string(), peer);
        }
    }

    /// How often `getInfo` was sent to `address`
    pub fn info_calls(&self, address: &str) -> usize {
        self.info_calls
            .lock()
            .map(|calls| calls.get(address).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Block ids sent with `getNextBlockIds` to `address`, in call order
    pub fn next_block_requests(&self, address: &str) -> Vec<String> {
        self.next_block_requests
            .lock()
            .map(|requests| requests.get(address).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn peer(&self, address: &str) -> Result<ScriptedPeer, ProbeError> {
        self.peers
            .lock()
            .ok()
            .and_then(|peers| peers.get(address).cloned())
            .ok_or_else(|| ProbeError::Transport(format!("connection refused: {}", address)))
    }
}

#[async_trait]
impl PeerClient for ScriptedNetwork {
    async fn get_info(&self, address: &str) -> Result<PeerInfoResponse, ProbeError> {
        if let Ok(mut calls) = self.info_calls.lock() {
            *calls.entry(address.to_string()).or_insert(0) += 1;
        }
        self.peer(address)?.info
    }

    async fn get_peers(&self, address: &str) -> Result<Vec<String>, ProbeError> {
        self.peer(address)?.peers
    }

    async fn get_cumulative_difficulty(
        &self,
        address: &str,
    ) -> Result<CumulativeDifficultyResponse, ProbeError> {
        self.peer(address)?.difficulty
    }

    async fn get_next_block_ids(
        &self,
        address: &str,
        block_id: &str,
    ) -> Result<Vec<String>, ProbeError> {
        if let Ok(mut requests) = self.next_block_requests.lock() {
            requests
                .entry(address.to_string())
                .or_default()
                .push(block_id.to_string());
        }
        self.peer(address)?.next_block_ids
    }
}

// =============================================================================
// GEO
// =============================================================================

/// Resolves every IP to the same country
pub struct FixedCountry(pub &'static str);

#[async_trait]
impl CountryLookup for FixedCountry {
    async fn resolve_country(&self, _ip: IpAddr) -> String {
        self.0.to_string()
    }
}
