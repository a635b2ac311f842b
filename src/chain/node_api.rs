//! Ledger backed by the local node's HTTP API
//!
//! `getBlocks` for the chain tip and `getBlock&height=H` for historical
//! difficulty. Cumulative difficulty arrives as a decimal string and is
//! re-encoded big-endian so every ledger source decodes the same way.

use async_trait::async_trait;
use serde::Deserialize;

use super::{decimal_to_difficulty, Ledger, LedgerBlock};
use crate::error::ChainError;

/// BRS API error code for an unknown block
const ERROR_UNKNOWN_BLOCK: i64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiBlock {
    block: String,
    height: u64,
    cumulative_difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiBlocks {
    #[serde(default)]
    blocks: Vec<ApiBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    error_code: Option<i64>,
    error_description: Option<String>,
}

/// Node HTTP API client
pub struct NodeApiLedger {
    http: reqwest::Client,
    base_url: String,
}

impl NodeApiLedger {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn request(&self, query: &[(&str, String)]) -> Result<serde_json::Value, ChainError> {
        let url = format!("{}/burst", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Request(format!("HTTP error: {}", response.status())));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ChainError::Malformed(e.to_string()))
    }
}

fn api_error(value: &serde_json::Value) -> Option<ApiError> {
    value.get("errorCode")?;
    serde_json::from_value(value.clone()).ok()
}

fn into_ledger_block(block: ApiBlock) -> Result<LedgerBlock, ChainError> {
    let id = block
        .block
        .parse::<u64>()
        .map_err(|_| ChainError::Malformed(format!("block id {:?}", block.block)))?;

    let raw = block
        .cumulative_difficulty
        .as_deref()
        .ok_or_else(|| ChainError::Malformed(format!("block {} has no cumulativeDifficulty", id)))?;

    let cumulative_difficulty = decimal_to_difficulty(raw)
        .ok_or_else(|| ChainError::Malformed(format!("cumulativeDifficulty {:?}", raw)))?;

    Ok(LedgerBlock {
        height: block.height,
        id,
        cumulative_difficulty,
    })
}

#[async_trait]
impl Ledger for NodeApiLedger {
    async fn top_blocks(&self, count: usize) -> Result<Vec<LedgerBlock>, ChainError> {
        if count == 0 {
            return Ok(vec![]);
        }

        let value = self
            .request(&[
                ("requestType", "getBlocks".to_string()),
                ("firstIndex", "0".to_string()),
                ("lastIndex", (count - 1).to_string()),
            ])
            .await?;

        if let Some(err) = api_error(&value) {
            return Err(ChainError::Request(err.error_description.unwrap_or_default()));
        }

        let parsed: ApiBlocks =
            serde_json::from_value(value).map_err(|e| ChainError::Malformed(e.to_string()))?;

        let mut blocks = parsed
            .blocks
            .into_iter()
            .map(into_ledger_block)
            .collect::<Result<Vec<_>, _>>()?;

        blocks.sort_by(|a, b| b.height.cmp(&a.height));
        blocks.truncate(count);

        Ok(blocks)
    }

    async fn cumulative_difficulty_at(&self, height: u64) -> Result<Option<Vec<u8>>, ChainError> {
        let value = self
            .request(&[
                ("requestType", "getBlock".to_string()),
                ("height", height.to_string()),
            ])
            .await?;

        if let Some(err) = api_error(&value) {
            if err.error_code == Some(ERROR_UNKNOWN_BLOCK) {
                return Ok(None);
            }
            return Err(ChainError::Request(err.error_description.unwrap_or_default()));
        }

        let block: ApiBlock =
            serde_json::from_value(value).map_err(|e| ChainError::Malformed(e.to_string()))?;

        into_ledger_block(block).map(|b| Some(b.cumulative_difficulty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::difficulty_to_decimal;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_top_blocks_sorted_descending() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/burst")
            .match_query(Matcher::UrlEncoded("requestType".into(), "getBlocks".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"blocks":[
                    {"block":"300","height":3,"cumulativeDifficulty":"30"},
                    {"block":"100","height":1,"cumulativeDifficulty":"10"},
                    {"block":"200","height":2,"cumulativeDifficulty":"18446744073709551616"}
                ]}"#,
            )
            .create_async()
            .await;

        let ledger = NodeApiLedger::new(reqwest::Client::new(), &server.url());
        let blocks = ledger.top_blocks(3).await.unwrap();

        assert_eq!(blocks.iter().map(|b| b.height).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(blocks[1].id, 200);
        assert_eq!(difficulty_to_decimal(&blocks[1].cumulative_difficulty), "18446744073709551616");
    }

    #[tokio::test]
    async fn test_unknown_height_is_none() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/burst")
            .match_query(Matcher::UrlEncoded("requestType".into(), "getBlock".into()))
            .with_status(200)
            .with_body(r#"{"errorCode":5,"errorDescription":"Unknown block"}"#)
            .create_async()
            .await;

        let ledger = NodeApiLedger::new(reqwest::Client::new(), &server.url());
        assert_eq!(ledger.cumulative_difficulty_at(12).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_difficulty_is_malformed() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/burst")
            .match_query(Matcher::UrlEncoded("requestType".into(), "getBlock".into()))
            .with_status(200)
            .with_body(r#"{"block":"1","height":12}"#)
            .create_async()
            .await;

        let ledger = NodeApiLedger::new(reqwest::Client::new(), &server.url());
        assert!(matches!(
            ledger.cumulative_difficulty_at(12).await,
            Err(ChainError::Malformed(_))
        ));
    }
}
