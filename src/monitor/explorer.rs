//! Node Explorer
//!
//! Expands one node into its peer list and probes every address found,
//! writing into a results map shared by the whole sweep.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::prober::PeerProber;
use crate::p2p::PeerClient;
use crate::types::{normalize_address, ChainReference, PeerSnapshot};

/// Address-keyed outcome of every probe in one sweep.
///
/// Each address is probed at most once: the first caller claims it and
/// later callers skip it. `None` marks a claimed address with no answer.
#[derive(Default)]
pub struct SweepResults {
    entries: Mutex<HashMap<String, Option<PeerSnapshot>>>,
    failures: AtomicUsize,
}

impl SweepResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `address` for probing. False if someone already did.
    pub async fn claim(&self, address: &str) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(address) {
            return false;
        }
        entries.insert(address.to_string(), None);
        true
    }

    pub async fn record(&self, address: &str, snapshot: PeerSnapshot) {
        self.entries
            .lock()
            .await
            .insert(address.to_string(), Some(snapshot));
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Addresses claimed so far
    pub async fn probed(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Successful snapshots ordered by probed address.
    ///
    /// Two probed addresses may announce the same peer; both are returned.
    pub async fn successes(&self) -> Vec<PeerSnapshot> {
        let entries = self.entries.lock().await;

        let mut found: Vec<(&String, &PeerSnapshot)> = entries
            .iter()
            .filter_map(|(key, s)| s.as_ref().map(|s| (key, s)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));

        found.into_iter().map(|(_, s)| s.clone()).collect()
    }
}

pub struct NodeExplorer {
    client: Arc<dyn PeerClient>,
    prober: Arc<PeerProber>,

    /// Probes in flight per node
    node_concurrency: usize,

    /// Probe peers one after another
    sequential: bool,
}

impl NodeExplorer {
    pub fn new(
        client: Arc<dyn PeerClient>,
        prober: Arc<PeerProber>,
        node_concurrency: usize,
        sequential: bool,
    ) -> Self {
        Self {
            client,
            prober,
            node_concurrency: node_concurrency.max(1),
            sequential,
        }
    }

    /// Probe `address` and every peer it knows.
    ///
    /// A node whose peer list cannot be fetched is skipped entirely.
    pub async fn explore(&self, address: &str, reference: &ChainReference, results: &SweepResults) {
        debug!("Node: {}", address);

        let peers = match self.client.get_peers(address).await {
            Ok(peers) => peers,
            Err(e) => {
                debug!("Can't connect to node {}: {}", address, e);
                return;
            }
        };

        self.probe_into(address, reference, results).await;

        if self.sequential {
            for peer in &peers {
                self.probe_into(peer, reference, results).await;
            }
        } else {
            stream::iter(peers)
                .for_each_concurrent(self.node_concurrency, |peer| async move {
                    self.probe_into(&peer, reference, results).await
                })
                .await;
        }
    }

    /// Probe a single address unless it was already claimed this sweep
    pub async fn probe_into(&self, address: &str, reference: &ChainReference, results: &SweepResults) {
        let key = normalize_address(address, self.prober.default_port());
        if !results.claim(&key).await {
            return;
        }

        match self.prober.probe(address, reference).await {
            Ok(snapshot) => results.record(&key, snapshot).await,
            Err(e) => {
                debug!("Can't connect to peer {}: {}", address, e);
                results.record_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{snapshot, FixedCountry, MemoryLedger, ScriptedNetwork, ScriptedPeer};

    fn reference() -> ChainReference {
        ChainReference {
            height: 100,
            id: "555".to_string(),
            cumulative_difficulty: MemoryLedger::difficulty(100),
            previous_block_id: "444".to_string(),
        }
    }

    fn explorer(network: Arc<ScriptedNetwork>, sequential: bool) -> NodeExplorer {
        let prober = Arc::new(PeerProber::new(
            network.clone(),
            Arc::new(FixedCountry("DE")),
            "3.0.0".parse().unwrap(),
            8123,
        ));
        NodeExplorer::new(network, prober, 10, sequential)
    }

    #[tokio::test]
    async fn test_claim_is_first_writer_wins() {
        let results = SweepResults::new();
        assert!(results.claim("a").await);
        assert!(!results.claim("a").await);

        results.record("a", snapshot("a", 1)).await;
        assert!(!results.claim("a").await);
        assert_eq!(results.successes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_successes_ordered_by_probed_address() {
        let results = SweepResults::new();
        results.record("10.0.0.3", snapshot("other.example", 3)).await;
        results.record("10.0.0.1", snapshot("node.example", 1)).await;
        results.record("10.0.0.2", snapshot("node.example", 2)).await;
        results.claim("10.0.0.4").await;

        let heights: Vec<u64> = results.successes().await.iter().map(|s| s.height).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_explore_probes_node_and_peers() {
        let network = Arc::new(ScriptedNetwork::new());
        network.add(
            "10.0.0.1",
            ScriptedPeer::at_height(99).with_peers(&["10.0.0.2", "10.0.0.3", "10.0.0.4"]),
        );
        network.add("10.0.0.2", ScriptedPeer::at_height(99));
        network.add("10.0.0.3", ScriptedPeer::at_height(98));
        network.add("10.0.0.4", ScriptedPeer::offline());

        let results = SweepResults::new();
        explorer(network, false)
            .explore("10.0.0.1", &reference(), &results)
            .await;

        assert_eq!(results.probed().await, 4);
        assert_eq!(results.failures(), 1);
        assert_eq!(results.successes().await.len(), 3);
    }

    #[tokio::test]
    async fn test_node_without_peer_list_is_skipped() {
        let network = Arc::new(ScriptedNetwork::new());
        network.add("10.0.0.1", ScriptedPeer::at_height(99).without_peer_list());

        let results = SweepResults::new();
        explorer(network.clone(), false)
            .explore("10.0.0.1", &reference(), &results)
            .await;

        assert_eq!(results.probed().await, 0);
        assert_eq!(network.info_calls("10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn test_shared_peer_probed_once() {
        let network = Arc::new(ScriptedNetwork::new());
        network.add("10.0.0.1", ScriptedPeer::at_height(99).with_peers(&["10.0.0.3"]));
        network.add("10.0.0.2", ScriptedPeer::at_height(99).with_peers(&["10.0.0.3:8123"]));
        network.add("10.0.0.3", ScriptedPeer::at_height(99));
        network.add("10.0.0.3:8123", ScriptedPeer::at_height(99));

        let explorer = explorer(network.clone(), true);
        let results = SweepResults::new();
        explorer.explore("10.0.0.1", &reference(), &results).await;
        explorer.explore("10.0.0.2", &reference(), &results).await;

        assert_eq!(
            network.info_calls("10.0.0.3") + network.info_calls("10.0.0.3:8123"),
            1
        );
        assert_eq!(results.successes().await.len(), 3);
    }
}
