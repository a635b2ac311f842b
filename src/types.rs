//! Core types for the peer monitor
//!
//! Persisted peer rows, per-sweep probe snapshots, the local chain reference
//! and the JSON payloads of the BRS peer protocol.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Country code used when geolocation has no answer
pub const UNKNOWN_COUNTRY: &str = "??";

/// Maximum length of free-form text columns
pub const MAX_FIELD_LEN: usize = 255;

// =============================================================================
// PEER STATE
// =============================================================================

/// Classification of a peer relative to the local chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Ahead of the local reference and building on the same chain
    Online = 1,

    /// Did not answer this sweep (also the per-sweep baseline)
    Unreachable = 2,

    /// At or below the local reference with matching cumulative difficulty
    Sync = 3,

    /// Height unchanged since the last observation
    Stuck = 4,

    /// Following a different chain
    Forked = 5,
}

impl PeerState {
    pub const ALL: [PeerState; 5] = [
        PeerState::Online,
        PeerState::Unreachable,
        PeerState::Sync,
        PeerState::Stuck,
        PeerState::Forked,
    ];

    /// Whether a sweep ending in this state counts as downtime
    pub fn is_downtime(&self) -> bool {
        matches!(self, PeerState::Unreachable | PeerState::Stuck | PeerState::Forked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Online => "online",
            PeerState::Unreachable => "unreachable",
            PeerState::Sync => "sync",
            PeerState::Stuck => "stuck",
            PeerState::Forked => "forked",
        }
    }

    /// Numeric code (1-5), stable across releases
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" | "1" => Ok(PeerState::Online),
            "unreachable" | "2" => Ok(PeerState::Unreachable),
            "sync" | "in-sync" | "3" => Ok(PeerState::Sync),
            "stuck" | "4" => Ok(PeerState::Stuck),
            "forked" | "5" => Ok(PeerState::Forked),
            other => Err(format!("unknown peer state: {}", other)),
        }
    }
}

// =============================================================================
// CHAIN REFERENCE
// =============================================================================

/// Baseline the peers of one sweep are judged against.
///
/// Taken from the block below the local tip, so a tip that has not
/// propagated yet does not make every peer look behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReference {
    /// Height of the reference block
    pub height: u64,

    /// Id of the reference block (decimal)
    pub id: String,

    /// Cumulative difficulty of the reference block (decimal)
    pub cumulative_difficulty: String,

    /// Id of the block below the reference block (decimal)
    pub previous_block_id: String,
}

// =============================================================================
// PEER SNAPSHOT
// =============================================================================

/// What one successful probe learned about a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Normalized announced address (store identity)
    pub announced_address: String,

    /// Resolved IP of the address used to reach the peer
    pub real_ip: Option<String>,

    pub platform: String,
    pub application: String,
    pub version: String,

    /// Peer's chain height
    pub height: u64,

    /// Peer's cumulative difficulty (decimal)
    pub cumulative_difficulty: String,

    /// Two-letter country code or `??`
    pub country_code: String,

    /// Block ids the peer has after our `previous_block_id`
    pub next_block_ids: Vec<String>,

    /// When the peer answered
    pub last_online_at: DateTime<Utc>,
}

impl PeerSnapshot {
    /// Check the payload before it is written to the store
    pub fn validate(&self) -> Result<(), String> {
        if self.announced_address.is_empty() {
            return Err("announced_address is empty".to_string());
        }
        if self.announced_address.len() > MAX_FIELD_LEN {
            return Err("announced_address too long".to_string());
        }

        for (name, value) in [
            ("platform", &self.platform),
            ("application", &self.application),
            ("version", &self.version),
        ] {
            if value.len() > MAX_FIELD_LEN {
                return Err(format!("{} too long", name));
            }
        }

        if self.country_code.chars().count() != 2 {
            return Err(format!("invalid country_code: {:?}", self.country_code));
        }

        if self.cumulative_difficulty.is_empty()
            || self.cumulative_difficulty.len() > MAX_FIELD_LEN
            || !self.cumulative_difficulty.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!(
                "invalid cumulative_difficulty: {:?}",
                self.cumulative_difficulty
            ));
        }

        Ok(())
    }
}

// =============================================================================
// PEER RECORD
// =============================================================================

/// One persisted peer, keyed by announced address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub announced_address: String,
    pub real_ip: Option<String>,

    pub platform: String,
    pub application: String,
    pub version: String,

    pub height: u64,
    pub cumulative_difficulty: String,

    pub country_code: String,
    pub state: PeerState,

    /// Sweeps observed in a downtime state
    pub downtime: u64,

    /// Sweeps this row has lived through
    pub lifetime: u64,

    /// `100 - downtime / lifetime * 100`
    pub availability: f64,

    pub last_online_at: DateTime<Utc>,

    /// Written by the reward feed only
    pub reward_state: Option<String>,
    pub reward_time: Option<String>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl PeerRecord {
    /// Create a row for a peer seen for the first time
    pub fn from_snapshot(snapshot: &PeerSnapshot, state: PeerState, now: DateTime<Utc>) -> Self {
        Self {
            announced_address: snapshot.announced_address.clone(),
            real_ip: snapshot.real_ip.clone(),
            platform: snapshot.platform.clone(),
            application: snapshot.application.clone(),
            version: snapshot.version.clone(),
            height: snapshot.height,
            cumulative_difficulty: snapshot.cumulative_difficulty.clone(),
            country_code: snapshot.country_code.clone(),
            state,
            downtime: 0,
            lifetime: 0,
            availability: 0.0,
            last_online_at: snapshot.last_online_at,
            reward_state: None,
            reward_time: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Overwrite the probed fields, keeping counters and reward data
    pub fn apply_snapshot(&mut self, snapshot: &PeerSnapshot, state: PeerState, now: DateTime<Utc>) {
        self.real_ip = snapshot.real_ip.clone();
        self.platform = snapshot.platform.clone();
        self.application = snapshot.application.clone();
        self.version = snapshot.version.clone();
        self.height = snapshot.height;
        self.cumulative_difficulty = snapshot.cumulative_difficulty.clone();
        self.country_code = snapshot.country_code.clone();
        self.state = state;
        self.last_online_at = snapshot.last_online_at;
        self.modified_at = now;
    }

    /// Derive availability from the counters. Rows with no lifetime yet are left alone.
    pub fn recompute_availability(&mut self) {
        if self.lifetime == 0 {
            return;
        }
        self.availability = 100.0 - (self.downtime as f64 / self.lifetime as f64 * 100.0);
    }

    /// Whether the peer has not answered for longer than `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.last_online_at >= max_age
    }
}

// =============================================================================
// ADDRESSES
// =============================================================================

/// Split `host[:port]`, `[v6]:port` or a bare IPv6 literal into host and port
pub fn split_host_port(address: &str) -> Option<(String, Option<u16>)> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let tail = &rest[end + 1..];
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match address.matches(':').count() {
        0 => Some((address.to_string(), None)),
        1 => {
            let (host, port) = address.split_once(':')?;
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), Some(port.parse().ok()?)))
        }
        // Bare IPv6 literal
        _ => Some((address.to_string(), None)),
    }
}

/// Drop a `:<default_port>` suffix so `host` and `host:default` are one peer
pub fn normalize_address(address: &str, default_port: u16) -> String {
    let address = address.trim();
    let suffix = format!(":{}", default_port);

    match address.strip_suffix(suffix.as_str()) {
        // A bare IPv6 literal can end in ":<digits>" without carrying a port
        Some(host) if !host.is_empty() && (!host.contains(':') || host.ends_with(']')) => {
            host.to_string()
        }
        _ => address.to_string(),
    }
}

// =============================================================================
// PEER VERSIONS
// =============================================================================

/// Dotted numeric version such as `3.8.0` or `v3.8.2-rc1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerVersion(Vec<u64>);

impl FromStr for PeerVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // Pre-release and build tags do not take part in the comparison
        let core = trimmed
            .split(&['-', '+'][..])
            .next()
            .unwrap_or_default();

        if core.is_empty() {
            return Err(format!("empty version: {:?}", s));
        }

        let parts = core
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("non-numeric version: {:?}", s))?;

        Ok(PeerVersion(parts))
    }
}

impl Ord for PeerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for PeerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PeerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// A reported version passes if it parses and is not below `minimum`
pub fn is_good_version(version: &str, minimum: &PeerVersion) -> bool {
    match version.parse::<PeerVersion>() {
        Ok(v) => v >= *minimum,
        Err(_) => false,
    }
}

// =============================================================================
// PEER PROTOCOL PAYLOADS
// =============================================================================

/// `getInfo` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfoResponse {
    #[serde(default)]
    pub announced_address: Option<String>,

    #[serde(default)]
    pub application: String,

    #[serde(default)]
    pub platform: String,

    #[serde(default)]
    pub version: String,
}

/// `getCumulativeDifficulty` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeDifficultyResponse {
    pub cumulative_difficulty: String,
    pub blockchain_height: u64,
}

/// `getPeers` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeersResponse {
    #[serde(default)]
    pub peers: Vec<String>,
}

/// `getNextBlockIds` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextBlockIdsResponse {
    #[serde(default)]
    pub next_block_ids: Vec<String>,
}
