//! Reconciler
//!
//! Applies probe results to the peer store. Every store-mutating job runs
//! under the shared `SweepGuard` and commits a single transaction.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::classifier::classify;
use super::explorer::{NodeExplorer, SweepResults};
use super::guard::SweepGuard;
use crate::api::Metrics;
use crate::chain::LocalChain;
use crate::config::MonitorConfig;
use crate::error::SweepError;
use crate::store::{PeerStore, PeerTransaction};
use crate::types::{normalize_address, ChainReference, PeerRecord, PeerSnapshot, PeerState};

/// Totals of one committed sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub reference_height: u64,
    pub candidates: usize,
    pub probed: usize,
    pub found: usize,
    pub new_peers: usize,
    pub invalid: usize,
    pub evicted: usize,
    pub total_peers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SweepOutcome {
    Completed(SweepReport),

    /// Too few peers answered; nothing was written
    Rejected { found: usize, online_before: usize },

    /// Another job held the guard
    Skipped,
}

/// `[address, _, reward_state, reward_time]` row of the reward feed
#[derive(Debug, Clone, PartialEq)]
pub struct RewardEntry {
    pub address: String,
    pub reward_state: Option<String>,
    pub reward_time: Option<String>,
}

/// Sweep, offline check, cleanup and reward sync over one peer store
pub struct PeerMonitor {
    config: Arc<MonitorConfig>,
    chain: Arc<LocalChain>,
    store: Arc<RwLock<PeerStore>>,
    explorer: Arc<NodeExplorer>,
    guard: Arc<SweepGuard>,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl PeerMonitor {
    pub fn new(
        config: Arc<MonitorConfig>,
        chain: Arc<LocalChain>,
        store: Arc<RwLock<PeerStore>>,
        explorer: Arc<NodeExplorer>,
        guard: Arc<SweepGuard>,
        http: reqwest::Client,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            chain,
            store,
            explorer,
            guard,
            http,
            metrics,
        }
    }

    // =========================================================================
    // FULL SWEEP
    // =========================================================================

    /// Probe every known and bootstrap peer and reconcile the store
    pub async fn run_sweep(&self) -> Result<SweepOutcome, SweepError> {
        let result = self.guard.run("Peer sweep", || self.full_sweep()).await;

        match result {
            Ok(Some(outcome)) => {
                match &outcome {
                    SweepOutcome::Completed(report) => {
                        self.metrics.inc_sweeps_completed();
                        self.metrics.set_last_sweep_timestamp(Utc::now().timestamp().max(0) as u64);
                        info!(
                            "✅ Sweep done: {} found, {} new, {} evicted, {} peers stored",
                            report.found, report.new_peers, report.evicted, report.total_peers
                        );
                    }
                    SweepOutcome::Rejected { .. } => self.metrics.inc_sweeps_rejected(),
                    SweepOutcome::Skipped => self.metrics.inc_sweeps_skipped(),
                }
                Ok(outcome)
            }
            Ok(None) => {
                self.metrics.inc_sweeps_skipped();
                Ok(SweepOutcome::Skipped)
            }
            Err(e) => {
                self.metrics.inc_sweeps_failed();
                warn!("Peer sweep aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn full_sweep(&self) -> Result<SweepOutcome, SweepError> {
        info!("🔍 Starting peer sweep");

        let reference = self.chain.reference().await?;
        self.metrics.set_reference_height(reference.height);
        info!(
            "Checking for height: {}, id: {}, prev id: {}",
            reference.height, reference.id, reference.previous_block_id
        );

        let candidates = self.candidates().await;
        debug!("Sweep candidates: {:?}", candidates);

        let results = SweepResults::new();
        self.explore_all(&candidates, &reference, &results).await;

        let snapshots = results.successes().await;
        let probed = results.probed().await;
        self.metrics
            .add_probes(probed as u64, results.failures() as u64);

        let online_before = self.store.read().await.count_by_state(PeerState::Online);
        if (snapshots.len() as f64) < online_before as f64 * self.config.sanity_ratio {
            warn!(
                "Peers update was rejected: {} found, {} were online",
                snapshots.len(),
                online_before
            );
            return Ok(SweepOutcome::Rejected {
                found: snapshots.len(),
                online_before,
            });
        }

        let difficulties = self.local_difficulties(&snapshots, &reference).await?;

        let now = Utc::now();
        let mut report = SweepReport {
            reference_height: reference.height,
            candidates: candidates.len(),
            probed,
            found: snapshots.len(),
            ..Default::default()
        };

        let mut store = self.store.write().await;
        let mut tx = store.transaction();

        let previous_heights: HashMap<String, u64> = tx
            .records()
            .map(|p| (p.announced_address.clone(), p.height))
            .collect();

        // Every row starts the sweep unreachable
        tx.update_all(|p| p.state = PeerState::Unreachable);

        let mut inserted = HashSet::new();
        for snapshot in &snapshots {
            self.apply_snapshot(
                &mut tx,
                snapshot,
                &reference,
                &previous_heights,
                &difficulties,
                &mut inserted,
                &mut report,
            );
        }

        tx.update_all(|p| p.lifetime += 1);
        tx.update_where(|p| p.state.is_downtime(), |p| p.downtime += 1);

        let evicted = tx.delete_older_than(now, self.config.eviction_age());
        for address in &evicted {
            debug!("Evicting stale peer {}", address);
        }
        report.evicted = evicted.len();

        tx.update_all(|p| {
            p.recompute_availability();
            p.modified_at = now;
        });

        report.total_peers = tx.len();
        store.commit(tx)?;

        self.metrics.add_evicted(report.evicted as u64);
        self.refresh_gauges(&store);

        Ok(SweepOutcome::Completed(report))
    }

    /// Unreachable peers first, then everything else plus bootstrap peers.
    /// Both groups are shuffled and every address appears once.
    async fn candidates(&self) -> Vec<String> {
        let store = self.store.read().await;

        let offline: Vec<String> = store
            .find_by_state(PeerState::Unreachable)
            .into_iter()
            .map(|p| p.announced_address.clone())
            .collect();

        let mut others: Vec<String> = store
            .list()
            .into_iter()
            .filter(|p| p.state != PeerState::Unreachable)
            .map(|p| p.announced_address.clone())
            .collect();

        others.extend(self.bootstrap_from(&store));
        drop(store);

        order_candidates(offline, others, self.config.default_p2p_port)
    }

    async fn explore_all(
        &self,
        candidates: &[String],
        reference: &ChainReference,
        results: &SweepResults,
    ) {
        if self.config.sequential {
            for address in candidates {
                self.explorer.explore(address, reference, results).await;
            }
            return;
        }

        stream::iter(candidates.iter().cloned())
            .for_each_concurrent(self.config.sweep_concurrency.max(1), |address| async move {
                self.explorer.explore(&address, reference, results).await
            })
            .await;
    }

    /// Local difficulty for every height a peer reported at or below the reference
    async fn local_difficulties(
        &self,
        snapshots: &[PeerSnapshot],
        reference: &ChainReference,
    ) -> Result<HashMap<u64, Option<String>>, SweepError> {
        let heights: HashSet<u64> = snapshots
            .iter()
            .map(|s| s.height)
            .filter(|h| *h <= reference.height)
            .collect();

        let mut difficulties = HashMap::with_capacity(heights.len());
        for height in heights {
            difficulties.insert(height, self.chain.difficulty_at(height).await?);
        }
        Ok(difficulties)
    }

    /// Validate, classify and upsert one snapshot
    #[allow(clippy::too_many_arguments)]
    fn apply_snapshot(
        &self,
        tx: &mut PeerTransaction,
        snapshot: &PeerSnapshot,
        reference: &ChainReference,
        previous_heights: &HashMap<String, u64>,
        difficulties: &HashMap<u64, Option<String>>,
        inserted: &mut HashSet<String>,
        report: &mut SweepReport,
    ) {
        let address = &snapshot.announced_address;

        if let Err(reason) = snapshot.validate() {
            report.invalid += 1;

            if inserted.contains(address) {
                // Second answer for a peer first seen this sweep disagrees
                tx.delete(address);
                inserted.remove(address);
                info!("Dropping inconsistent new peer {}: {}", address, reason);
            } else {
                info!("Not valid data for {}: {}", address, reason);
            }
            return;
        }

        let local = difficulties.get(&snapshot.height).and_then(|d| d.as_deref());
        let state = classify(reference, snapshot, previous_heights.get(address).copied(), local);
        let now = Utc::now();

        match tx.get(address).cloned() {
            Some(mut record) => {
                record.apply_snapshot(snapshot, state, now);
                tx.upsert(record);
            }
            None => {
                info!("🆕 Found new peer: {} ({})", address, state);
                tx.upsert(PeerRecord::from_snapshot(snapshot, state, now));
                inserted.insert(address.clone());
                report.new_peers += 1;
            }
        }
    }

    // =========================================================================
    // OFFLINE-ONLY SWEEP
    // =========================================================================

    /// Re-probe only the peers currently marked unreachable
    pub async fn run_offline_only_sweep(&self) -> Result<SweepOutcome, SweepError> {
        let result = self
            .guard
            .run("Offline peer check", || self.offline_sweep())
            .await;

        match result {
            Ok(Some(outcome)) => {
                self.metrics.inc_offline_sweeps();
                Ok(outcome)
            }
            Ok(None) => {
                self.metrics.inc_sweeps_skipped();
                Ok(SweepOutcome::Skipped)
            }
            Err(e) => {
                self.metrics.inc_sweeps_failed();
                warn!("Offline peer check aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn offline_sweep(&self) -> Result<SweepOutcome, SweepError> {
        let mut candidates: Vec<String> = self
            .store
            .read()
            .await
            .find_by_state(PeerState::Unreachable)
            .into_iter()
            .map(|p| p.announced_address.clone())
            .collect();

        if candidates.is_empty() {
            debug!("No unreachable peers to check");
            return Ok(SweepOutcome::Completed(SweepReport::default()));
        }
        candidates.sort();

        let reference = self.chain.reference().await?;
        self.metrics.set_reference_height(reference.height);

        let results = SweepResults::new();
        if self.config.sequential {
            for address in &candidates {
                self.explorer.probe_into(address, &reference, &results).await;
            }
        } else {
            let (reference, results) = (&reference, &results);
            stream::iter(candidates.iter().cloned())
                .for_each_concurrent(self.config.sweep_concurrency.max(1), |address| async move {
                    self.explorer.probe_into(&address, reference, results).await
                })
                .await;
        }

        let snapshots = results.successes().await;
        let probed = results.probed().await;
        self.metrics
            .add_probes(probed as u64, results.failures() as u64);

        let difficulties = self.local_difficulties(&snapshots, &reference).await?;

        let mut report = SweepReport {
            reference_height: reference.height,
            candidates: candidates.len(),
            probed,
            found: snapshots.len(),
            ..Default::default()
        };

        let mut store = self.store.write().await;
        let mut tx = store.transaction();

        let previous_heights: HashMap<String, u64> = tx
            .records()
            .map(|p| (p.announced_address.clone(), p.height))
            .collect();

        let mut inserted = HashSet::new();
        for snapshot in &snapshots {
            // Only rows that were unreachable may change here
            let unreachable = tx
                .get(&snapshot.announced_address)
                .map_or(false, |p| p.state == PeerState::Unreachable);
            if !unreachable {
                debug!(
                    "Ignoring {}: not an unreachable peer",
                    snapshot.announced_address
                );
                continue;
            }
            self.apply_snapshot(
                &mut tx,
                snapshot,
                &reference,
                &previous_heights,
                &difficulties,
                &mut inserted,
                &mut report,
            );
        }

        report.total_peers = tx.len();
        store.commit(tx)?;
        self.refresh_gauges(&store);

        if report.found > 0 {
            info!(
                "🔁 Offline check: {} of {} unreachable peers answered",
                report.found, report.candidates
            );
        }

        Ok(SweepOutcome::Completed(report))
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Delete peers not online for `cleanup_days` or with zero availability.
    /// `None` when another job held the guard.
    pub async fn cleanup_stale(&self) -> Result<Option<usize>, SweepError> {
        let result = self.guard.run("Peer cleanup", || self.cleanup()).await;

        match result {
            Ok(None) => {
                self.metrics.inc_sweeps_skipped();
                Ok(None)
            }
            Ok(Some(removed)) => Ok(Some(removed)),
            Err(e) => {
                self.metrics.inc_sweeps_failed();
                warn!("Peer cleanup aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn cleanup(&self) -> Result<usize, SweepError> {
        let now = Utc::now();
        let max_age = self.config.cleanup_age();

        let mut store = self.store.write().await;
        let mut tx = store.transaction();

        let removed = tx.delete_where(|p| p.is_stale(now, max_age) || p.availability == 0.0);
        store.commit(tx)?;
        self.refresh_gauges(&store);

        self.metrics.add_cleaned(removed.len() as u64);
        if !removed.is_empty() {
            info!("🧹 Removed {} stale peers", removed.len());
        }

        Ok(removed.len())
    }

    // =========================================================================
    // REWARD FEED
    // =========================================================================

    /// Copy reward state and time from the reward feed onto matching rows.
    /// Returns the number of rows updated, `None` when skipped.
    pub async fn sync_reward_states(&self) -> Result<Option<usize>, SweepError> {
        let Some(url) = self.config.reward_feed_url.as_deref() else {
            debug!("No reward feed configured");
            return Ok(Some(0));
        };

        let result = self.guard.run("Reward sync", || self.reward_sync(url)).await;

        match result {
            Ok(Some(updated)) => {
                self.metrics.inc_reward_syncs();
                Ok(Some(updated))
            }
            Ok(None) => {
                self.metrics.inc_sweeps_skipped();
                Ok(None)
            }
            Err(e) => {
                self.metrics.inc_sweeps_failed();
                warn!("Reward sync aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn reward_sync(&self, base_url: &str) -> Result<usize, SweepError> {
        let entries = self.fetch_reward_feed(base_url).await?;

        let mut store = self.store.write().await;
        let mut tx = store.transaction();
        let mut updated = 0;

        for entry in entries {
            let address = normalize_address(&entry.address, self.config.default_p2p_port);
            if let Some(mut record) = tx.get(&address).cloned() {
                record.reward_state = entry.reward_state;
                record.reward_time = entry.reward_time;
                tx.upsert(record);
                updated += 1;
            }
        }

        store.commit(tx)?;
        info!("🏅 Reward data received, {} peers updated", updated);

        Ok(updated)
    }

    async fn fetch_reward_feed(&self, base_url: &str) -> Result<Vec<RewardEntry>, SweepError> {
        let url = format!("{}/json/SNRinfo", base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SweepError::RewardFeed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SweepError::RewardFeed(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SweepError::RewardFeed(e.to_string()))?;

        parse_reward_feed(&body)
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    /// Configured bootstrap peers, plus online peers under the bootstrap
    /// networks when auto bootstrap is enabled
    pub async fn bootstrap_peers(&self) -> Vec<String> {
        let store = self.store.read().await;
        self.bootstrap_from(&store)
    }

    fn bootstrap_from(&self, store: &PeerStore) -> Vec<String> {
        let mut peers: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for peer in &self.config.bootstrap_peers {
            if seen.insert(normalize_address(peer, self.config.default_p2p_port)) {
                peers.push(peer.clone());
            }
        }

        if self.config.auto_bootstrap_peers {
            for record in store.find_by_state(PeerState::Online) {
                let address = &record.announced_address;
                let host = address.split(':').next().unwrap_or(address);
                let matches = self
                    .config
                    .bootstrap_networks
                    .iter()
                    .any(|network| host.ends_with(network.as_str()));

                if matches && seen.insert(address.clone()) {
                    peers.push(address.clone());
                }
            }
        }

        peers
    }

    fn refresh_gauges(&self, store: &PeerStore) {
        self.metrics.set_peers_total(store.total_count() as u64);
        for state in PeerState::ALL {
            self.metrics
                .set_state_count(state, store.count_by_state(state) as u64);
        }
    }
}

/// Shuffle both groups, unreachable first, dropping repeated addresses
fn order_candidates(mut offline: Vec<String>, mut others: Vec<String>, default_port: u16) -> Vec<String> {
    let mut rng = rand::thread_rng();
    offline.shuffle(&mut rng);
    others.shuffle(&mut rng);

    let mut seen = HashSet::new();
    offline
        .into_iter()
        .chain(others)
        .filter(|address| seen.insert(normalize_address(address, default_port)))
        .collect()
}

/// Parse `[[address, _, reward_state, reward_time], ...]`.
/// Rows without an address are ignored.
pub fn parse_reward_feed(body: &serde_json::Value) -> Result<Vec<RewardEntry>, SweepError> {
    let rows = body
        .as_array()
        .ok_or_else(|| SweepError::RewardFeed("expected a JSON array".to_string()))?;

    let text = |value: Option<&serde_json::Value>| -> Option<String> {
        match value? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    };

    Ok(rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            let address = row.first()?.as_str()?.trim();
            if address.is_empty() {
                return None;
            }
            Some(RewardEntry {
                address: address.to_string(),
                reward_state: text(row.get(2)),
                reward_time: text(row.get(3)),
            })
        })
        .collect())
}
