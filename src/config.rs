//! Peer Monitor Configuration
//!
//! Configurable parameters for the peer monitor.
//! Thresholds and concurrency limits are operator inputs, not protocol constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::PeerVersion;

/// Upper bound for the retention windows (about a century)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Main configuration for the peer monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // === Local node ===

    /// HTTP API of the local node (ledger replica)
    pub node_api_url: String,

    // === Peer protocol ===

    /// Peers reporting an older version are treated as unreachable
    pub min_peer_version: String,

    /// Default P2P port, stripped from announced addresses
    pub default_p2p_port: u16,

    /// Timeout for every outgoing request (seconds)
    pub request_timeout_secs: u64,

    // === Bootstrap ===

    /// Seed addresses always included as sweep candidates
    pub bootstrap_peers: Vec<String>,

    /// Also use online peers under `bootstrap_networks` as bootstrap peers
    pub auto_bootstrap_peers: bool,

    /// Domain suffixes eligible for auto bootstrap
    pub bootstrap_networks: Vec<String>,

    // === Timing ===

    /// Interval between full sweeps (seconds)
    pub sweep_interval_secs: u64,

    /// Interval between offline-only sweeps (seconds)
    pub offline_sweep_interval_secs: u64,

    /// Interval between automatic cleanups (seconds, 0 = manual only)
    pub cleanup_interval_secs: u64,

    /// Interval between reward feed syncs (seconds)
    pub reward_sync_interval_secs: u64,

    /// Delay before the first sweep after start (seconds)
    pub startup_delay_secs: u64,

    // === Concurrency ===

    /// Probes in flight per explored node
    pub node_concurrency: usize,

    /// Nodes explored in parallel
    pub sweep_concurrency: usize,

    /// Probe everything one at a time (deterministic output for test networks)
    pub sequential: bool,

    // === Reconciliation ===

    /// Minimum fraction of previously online peers a sweep must find
    pub sanity_ratio: f64,

    /// Rows not online for this many days are evicted by a full sweep
    pub eviction_days: i64,

    /// Rows not online for this many days are removed by cleanup
    pub cleanup_days: i64,

    /// Lease TTL for the sweep lock (seconds), renewed every third of it
    pub lock_ttl_secs: u64,

    // === Geolocation ===

    /// GeoLite2-Country database (optional)
    pub geoip_database: Option<PathBuf>,

    /// Remote lookup service, queried as `<url>/<ip>`
    pub geo_api_url: String,

    /// Cache lifetime of a resolved country (seconds)
    pub geo_cache_ttl_secs: u64,

    // === Reward feed ===

    /// Master explorer publishing `/json/SNRinfo` (optional)
    pub reward_feed_url: Option<String>,

    // === HTTP API ===

    /// Port for the read-only HTTP API
    pub api_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node_api_url: "http://127.0.0.1:8125".to_string(),

            min_peer_version: "3.0.0".to_string(),
            default_p2p_port: 8123,
            request_timeout_secs: 10,

            bootstrap_peers: vec![],
            auto_bootstrap_peers: false,
            bootstrap_networks: vec![".signum.network".to_string()],

            sweep_interval_secs: 900,          // 15 minutes
            offline_sweep_interval_secs: 60,   // 1 minute
            cleanup_interval_secs: 0,
            reward_sync_interval_secs: 21600,  // 6 hours
            startup_delay_secs: 0,

            node_concurrency: 10,
            sweep_concurrency: 20,
            sequential: false,

            sanity_ratio: 0.8,
            eviction_days: 5,
            cleanup_days: 3,
            lock_ttl_secs: 60,

            geoip_database: None,
            geo_api_url: "https://ipwho.is".to_string(),
            geo_cache_ttl_secs: 7 * 24 * 60 * 60,

            reward_feed_url: None,

            api_port: 8080,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_node_api_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.node_api_url = url;
        }
        self
    }

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential |= sequential;
        self
    }

    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        for peer in peers {
            if !self.bootstrap_peers.contains(&peer) {
                self.bootstrap_peers.push(peer);
            }
        }
        self
    }

    /// Parsed `min_peer_version`
    pub fn min_version(&self) -> anyhow::Result<PeerVersion> {
        self.min_peer_version
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid min_peer_version: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Eviction window of a full sweep, clamped to `[1, MAX_RETENTION_DAYS]`
    pub fn eviction_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.eviction_days.clamp(1, MAX_RETENTION_DAYS))
    }

    /// Cleanup window, clamped to `[1, MAX_RETENTION_DAYS]`
    pub fn cleanup_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.cleanup_days.clamp(1, MAX_RETENTION_DAYS))
    }

    pub fn geo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_cache_ttl_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        self.min_version()?;

        if self.node_concurrency == 0 || self.sweep_concurrency == 0 {
            anyhow::bail!(
                "node_concurrency ({}) and sweep_concurrency ({}) must be positive",
                self.node_concurrency,
                self.sweep_concurrency
            );
        }

        if !(0.0..=1.0).contains(&self.sanity_ratio) {
            anyhow::bail!("sanity_ratio ({}) must be within [0, 1]", self.sanity_ratio);
        }

        if self.cleanup_days <= 0 || self.eviction_days <= 0 {
            anyhow::bail!(
                "cleanup_days ({}) and eviction_days ({}) must be positive",
                self.cleanup_days,
                self.eviction_days
            );
        }

        if self.eviction_days > MAX_RETENTION_DAYS {
            anyhow::bail!(
                "eviction_days ({}) must not exceed {}",
                self.eviction_days,
                MAX_RETENTION_DAYS
            );
        }

        if self.cleanup_days > self.eviction_days {
            anyhow::bail!(
                "cleanup_days ({}) must not exceed eviction_days ({})",
                self.cleanup_days,
                self.eviction_days
            );
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }

        if self.lock_ttl_secs < 3 {
            anyhow::bail!("lock_ttl_secs ({}) must be at least 3", self.lock_ttl_secs);
        }

        if self.sweep_interval_secs == 0 || self.offline_sweep_interval_secs == 0 {
            anyhow::bail!("sweep intervals must be positive");
        }

        if self.geo_cache_ttl_secs == 0 {
            anyhow::bail!("geo_cache_ttl_secs must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.sweep_interval_secs, 900);
        assert_eq!(config.offline_sweep_interval_secs, 60);
        assert_eq!(config.node_concurrency, 10);
        assert_eq!(config.sweep_concurrency, 20);
        assert_eq!(config.eviction_days, 5);
        assert_eq!(config.cleanup_days, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();

        config.sanity_ratio = 1.5;
        assert!(config.validate().is_err());

        config = MonitorConfig::default();
        config.cleanup_days = 10;
        assert!(config.validate().is_err());

        config = MonitorConfig::default();
        config.min_peer_version = "three".to_string();
        assert!(config.validate().is_err());

        config = MonitorConfig::default();
        config.sweep_concurrency = 0;
        assert!(config.validate().is_err());

        config = MonitorConfig::default();
        config.eviction_days = i64::MAX;
        assert!(config.validate().is_err());

        config.eviction_days = MAX_RETENTION_DAYS;
        config.cleanup_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retention_windows_are_clamped() {
        let mut config = MonitorConfig::default();
        assert_eq!(config.eviction_age(), chrono::Duration::days(5));
        assert_eq!(config.cleanup_age(), chrono::Duration::days(3));

        config.eviction_days = i64::MAX;
        config.cleanup_days = i64::MIN;
        assert_eq!(config.eviction_age(), chrono::Duration::days(MAX_RETENTION_DAYS));
        assert_eq!(config.cleanup_age(), chrono::Duration::days(1));
    }

    #[test]
    fn test_builder_methods() {
        let config = MonitorConfig::default()
            .with_api_port(Some(9090))
            .with_node_api_url(None)
            .with_sequential(true)
            .with_bootstrap_peers(vec!["a.example".to_string(), "a.example".to_string()]);

        assert_eq!(config.api_port, 9090);
        assert_eq!(config.node_api_url, "http://127.0.0.1:8125");
        assert!(config.sequential);
        assert_eq!(config.bootstrap_peers, vec!["a.example".to_string()]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
            min_peer_version = "3.2.0"
            bootstrap_peers = ["europe.signum.network"]
            "#,
        )
        .unwrap();

        assert_eq!(config.min_peer_version, "3.2.0");
        assert_eq!(config.bootstrap_peers.len(), 1);
        assert_eq!(config.default_p2p_port, 8123);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");

        let mut config = MonitorConfig::default();
        config.sequential = true;
        config.save(&path).unwrap();

        let loaded = MonitorConfig::load(&path).unwrap();
        assert!(loaded.sequential);
    }
}
