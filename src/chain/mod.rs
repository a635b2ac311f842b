//! Local Chain Reference
//!
//! Reads the local ledger replica to establish the baseline peers are judged
//! against, and memoizes cumulative difficulty per height for the classifier.
//!
//! Finalized heights never change, so the per-height cache lives for the whole
//! process and is never invalidated.

mod node_api;

pub use node_api::NodeApiLedger;

use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ChainError;
use crate::types::ChainReference;

/// Number of top blocks needed to build a reference
const REFERENCE_DEPTH: usize = 3;

/// A block as stored by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBlock {
    pub height: u64,
    pub id: u64,

    /// Big-endian unsigned encoding
    pub cumulative_difficulty: Vec<u8>,
}

/// Read access to the local ledger replica
#[async_trait]
pub trait Ledger: Send + Sync {
    /// The `count` highest blocks, highest first
    async fn top_blocks(&self, count: usize) -> Result<Vec<LedgerBlock>, ChainError>;

    /// Raw cumulative difficulty of the block at `height`, if there is one
    async fn cumulative_difficulty_at(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError>;
}

/// Decode a big-endian difficulty buffer to its decimal form
pub fn difficulty_to_decimal(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_string()
}

/// Encode a decimal difficulty as a big-endian buffer
pub fn decimal_to_difficulty(decimal: &str) -> Option<Vec<u8>> {
    BigUint::parse_bytes(decimal.trim().as_bytes(), 10).map(|n| n.to_bytes_be())
}

/// Local chain view shared by every sweep
pub struct LocalChain {
    ledger: Arc<dyn Ledger>,

    /// height -> decimal cumulative difficulty
    difficulty_cache: RwLock<HashMap<u64, String>>,
}

impl LocalChain {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            difficulty_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build the reference from the second and third highest local blocks
    pub async fn reference(&self) -> Result<ChainReference, ChainError> {
        let blocks = self.ledger.top_blocks(REFERENCE_DEPTH).await?;
        if blocks.len() < REFERENCE_DEPTH {
            return Err(ChainError::NotEnoughBlocks(blocks.len()));
        }

        let reference = &blocks[1];
        let previous = &blocks[2];
        let cumulative_difficulty = difficulty_to_decimal(&reference.cumulative_difficulty);

        // Same value the classifier will look up for this height
        self.difficulty_cache
            .write()
            .await
            .insert(reference.height, cumulative_difficulty.clone());

        Ok(ChainReference {
            height: reference.height,
            id: reference.id.to_string(),
            cumulative_difficulty,
            previous_block_id: previous.id.to_string(),
        })
    }

    /// Decimal cumulative difficulty at `height`, memoized
    pub async fn difficulty_at(&self, height: u64) -> Result<Option<String>, ChainError> {
        if let Some(cached) = self.difficulty_cache.read().await.get(&height) {
            return Ok(Some(cached.clone()));
        }

        let raw = self.ledger.cumulative_difficulty_at(height).await?;
        let Some(raw) = raw else {
            debug!("No local block at height {}", height);
            return Ok(None);
        };

        let decimal = difficulty_to_decimal(&raw);
        self.difficulty_cache
            .write()
            .await
            .insert(height, decimal.clone());

        Ok(Some(decimal))
    }

    /// Number of memoized heights
    pub async fn cached_heights(&self) -> usize {
        self.difficulty_cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryLedger;

    #[test]
    fn test_difficulty_decoding() {
        assert_eq!(difficulty_to_decimal(&[]), "0");
        assert_eq!(difficulty_to_decimal(&[0x01, 0x00]), "256");
        // Leading zero byte from a signed encoding
        assert_eq!(difficulty_to_decimal(&[0x00, 0xff]), "255");

        let big = "340282366920938463463374607431768211457";
        let bytes = decimal_to_difficulty(big).unwrap();
        assert!(bytes.len() > 8);
        assert_eq!(difficulty_to_decimal(&bytes), big);

        assert!(decimal_to_difficulty("12x").is_none());
    }

    #[tokio::test]
    async fn test_reference_uses_second_block() {
        let ledger = Arc::new(MemoryLedger::with_chain(100));
        let chain = LocalChain::new(ledger.clone());

        let reference = chain.reference().await.unwrap();

        assert_eq!(reference.height, 99);
        assert_eq!(reference.id, MemoryLedger::block_id(99).to_string());
        assert_eq!(reference.previous_block_id, MemoryLedger::block_id(98).to_string());
        assert_eq!(reference.cumulative_difficulty, MemoryLedger::difficulty(99));
    }

    #[tokio::test]
    async fn test_reference_requires_three_blocks() {
        let ledger = Arc::new(MemoryLedger::with_chain(2));
        let chain = LocalChain::new(ledger);

        match chain.reference().await {
            Err(ChainError::NotEnoughBlocks(2)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reference_matches_height_lookup() {
        let ledger = Arc::new(MemoryLedger::with_chain(50));
        let chain = LocalChain::new(ledger.clone());

        let reference = chain.reference().await.unwrap();

        // A fresh chain view with an empty cache reads the ledger directly
        let fresh = LocalChain::new(ledger);
        let looked_up = fresh.difficulty_at(reference.height).await.unwrap();

        assert_eq!(looked_up.as_deref(), Some(reference.cumulative_difficulty.as_str()));
    }

    #[tokio::test]
    async fn test_difficulty_lookup_is_memoized() {
        let ledger = Arc::new(MemoryLedger::with_chain(20));
        let chain = LocalChain::new(ledger.clone());

        let first = chain.difficulty_at(10).await.unwrap();
        let second = chain.difficulty_at(10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.height_lookups(), 1);
        assert_eq!(chain.cached_heights().await, 1);

        assert_eq!(chain.difficulty_at(500).await.unwrap(), None);
    }
}
