//! Geo Resolver
//!
//! Maps a peer IP to a two-letter country code.
//!
//! ## Strategy
//!
//! 1. Offline GeoLite2 database (if configured)
//! 2. Remote lookup API as fallback
//! 3. `??` when neither has an answer
//!
//! Resolved codes are cached per IP for a long TTL. Lookups never fail.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::GeoError;
use crate::types::UNKNOWN_COUNTRY;

/// Upper bound on cached IPs before expired entries are purged
const MAX_CACHE_ENTRIES: usize = 50_000;

/// Country lookup used by the prober
#[async_trait]
pub trait CountryLookup: Send + Sync {
    /// Always yields a code, `??` when unknown
    async fn resolve_country(&self, ip: IpAddr) -> String;
}

/// Handle to an offline GeoLite2-Country database.
///
/// Opened once at startup and shared by reference.
pub struct GeoDatabase {
    reader: maxminddb::Reader<Vec<u8>>,
    path: PathBuf,
}

impl GeoDatabase {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = maxminddb::Reader::open_readfile(path).map_err(|e| GeoError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!("🌍 GeoIP database opened at {:?}", path);

        Ok(Self {
            reader,
            path: path.to_path_buf(),
        })
    }

    /// ISO code for `ip`, if the database knows it
    pub fn country(&self, ip: IpAddr) -> Option<String> {
        let record: maxminddb::geoip2::Country = self.reader.lookup(ip).ok()?;
        record
            .country
            .and_then(|c| c.iso_code)
            .map(|code| code.to_ascii_uppercase())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct CachedCountry {
    code: String,
    expires_at: Instant,
}

/// Database-first, API-fallback resolver with a TTL cache
pub struct GeoResolver {
    database: Option<Arc<GeoDatabase>>,
    http: reqwest::Client,
    api_url: String,
    ttl: Duration,
    cache: RwLock<HashMap<IpAddr, CachedCountry>>,
}

impl GeoResolver {
    pub fn new(
        database: Option<Arc<GeoDatabase>>,
        http: reqwest::Client,
        api_url: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            database,
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn cached(&self, ip: IpAddr) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(&ip)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.code.clone())
    }

    async fn remember(&self, ip: IpAddr, code: &str) {
        let now = Instant::now();
        let mut cache = self.cache.write().await;

        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.retain(|_, entry| entry.expires_at > now);
        }

        cache.insert(
            ip,
            CachedCountry {
                code: code.to_string(),
                expires_at: now + self.ttl,
            },
        );
    }

    async fn remote_lookup(&self, ip: IpAddr) -> Option<String> {
        let url = format!("{}/{}", self.api_url, ip);

        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Geo lookup failed for {}: {}", ip, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Geo lookup failed for {}: HTTP {}", ip, response.status());
            return None;
        }

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Geo lookup returned invalid JSON for {}: {}", ip, e);
                return None;
            }
        };

        let code = body
            .get("country_code")
            .and_then(|c| c.as_str())
            .filter(|c| c.chars().count() == 2)
            .map(|c| c.to_ascii_uppercase());

        if code.is_none() {
            warn!("Geo lookup has no country for {}", ip);
        }

        code
    }

    /// Number of live cache entries
    pub async fn cache_len(&self) -> usize {
        let now = Instant::now();
        self.cache
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[async_trait]
impl CountryLookup for GeoResolver {
    async fn resolve_country(&self, ip: IpAddr) -> String {
        if let Some(code) = self.cached(ip).await {
            return code;
        }

        let local = self.database.as_ref().and_then(|db| db.country(ip));
        let code = match local {
            Some(code) => Some(code),
            None => self.remote_lookup(ip).await,
        };

        match code {
            Some(code) => {
                debug!("Geo lookup: {} is in {}", ip, code);
                self.remember(ip, &code).await;
                code
            }
            None => UNKNOWN_COUNTRY.to_string(),
        }
    }
}
