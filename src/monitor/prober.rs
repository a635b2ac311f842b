//! Peer Prober
//!
//! Questions a single peer and turns its answers into a `PeerSnapshot`.
//!
//! 1. `getInfo` (hard failure on error or an old version)
//! 2. `getCumulativeDifficulty` (hard failure on error)
//! 3. `getNextBlockIds` after our previous block (optional, empty on error)
//! 4. IP resolution and country lookup (never fails)

use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::ProbeError;
use crate::geo::CountryLookup;
use crate::p2p::PeerClient;
use crate::types::{
    is_good_version, normalize_address, split_host_port, ChainReference, PeerSnapshot,
    PeerVersion, UNKNOWN_COUNTRY,
};

/// Upper bound for resolving a peer hostname
const DNS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PeerProber {
    client: Arc<dyn PeerClient>,
    geo: Arc<dyn CountryLookup>,
    min_version: PeerVersion,
    default_port: u16,
}

impl PeerProber {
    pub fn new(
        client: Arc<dyn PeerClient>,
        geo: Arc<dyn CountryLookup>,
        min_version: PeerVersion,
        default_port: u16,
    ) -> Self {
        Self {
            client,
            geo,
            min_version,
            default_port,
        }
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Probe the peer reachable at `address`
    pub async fn probe(
        &self,
        address: &str,
        reference: &ChainReference,
    ) -> Result<PeerSnapshot, ProbeError> {
        let info = self.client.get_info(address).await?;

        if !is_good_version(&info.version, &self.min_version) {
            debug!("Old version from {}: {:?}", address, info.version);
            return Err(ProbeError::OldVersion(info.version));
        }

        let announced = info
            .announced_address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| address.to_string());
        let announced_address = normalize_address(&announced, self.default_port);

        let difficulty = self.client.get_cumulative_difficulty(address).await?;

        let next_block_ids = match self
            .client
            .get_next_block_ids(address, &reference.previous_block_id)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                debug!("Could not get next block ids from {}: {}", address, e);
                vec![]
            }
        };

        let real_ip = resolve_ip(address).await;
        let country_code = match real_ip {
            Some(ip) => self.geo.resolve_country(ip).await,
            None => UNKNOWN_COUNTRY.to_string(),
        };

        Ok(PeerSnapshot {
            announced_address,
            real_ip: real_ip.map(|ip| ip.to_string()),
            platform: info.platform,
            application: info.application,
            version: info.version,
            height: difficulty.blockchain_height,
            cumulative_difficulty: difficulty.cumulative_difficulty,
            country_code,
            next_block_ids,
            last_online_at: Utc::now(),
        })
    }
}

/// IP behind `address`: literals pass through, hostnames go through DNS
pub async fn resolve_ip(address: &str) -> Option<IpAddr> {
    let (host, port) = split_host_port(address)?;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    let lookup = tokio::net::lookup_host((host.as_str(), port.unwrap_or(0)));
    let resolved = tokio::time::timeout(DNS_TIMEOUT, lookup).await;
    match resolved {
        Ok(Ok(addrs)) => {
            let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
        }
        Ok(Err(e)) => {
            debug!("Can't resolve host {}: {}", host, e);
            None
        }
        Err(_) => {
            debug!("Resolving host {} timed out", host);
            None
        }
    }
}
