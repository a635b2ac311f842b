//! BRS Peer Protocol Client
//!
//! Talks to remote nodes over the JSON peer protocol.
//!
//! ## Protocol
//!
//! Every call is an HTTP POST to `http://<host>:<port>/burst` with a JSON body
//! `{"protocol": "B1", "requestType": "<name>", ...}`. A peer that rejects a
//! request answers with a JSON object carrying an `error` field.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::ProbeError;
use crate::types::{
    split_host_port, CumulativeDifficultyResponse, NextBlockIdsResponse, PeerInfoResponse,
    PeersResponse,
};

/// Protocol identifier sent with every request
const PROTOCOL: &str = "B1";

/// Peer protocol operations used by the monitor
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn get_info(&self, address: &str) -> Result<PeerInfoResponse, ProbeError>;

    /// Addresses the peer knows about
    async fn get_peers(&self, address: &str) -> Result<Vec<String>, ProbeError>;

    async fn get_cumulative_difficulty(
        &self,
        address: &str,
    ) -> Result<CumulativeDifficultyResponse, ProbeError>;

    /// Ids of the blocks following `block_id` on the peer's chain
    async fn get_next_block_ids(
        &self,
        address: &str,
        block_id: &str,
    ) -> Result<Vec<String>, ProbeError>;
}

/// reqwest-backed peer client
pub struct HttpPeerClient {
    http: reqwest::Client,
    default_port: u16,
}

impl HttpPeerClient {
    pub fn new(http: reqwest::Client, default_port: u16) -> Self {
        Self { http, default_port }
    }

    /// Endpoint for `address`, adding the default port when none is given
    pub fn endpoint(&self, address: &str) -> Result<String, ProbeError> {
        let (host, port) = split_host_port(address)
            .ok_or_else(|| ProbeError::Transport(format!("invalid address: {:?}", address)))?;
        let port = port.unwrap_or(self.default_port);

        if host.contains(':') {
            Ok(format!("http://[{}]:{}/burst", host, port))
        } else {
            Ok(format!("http://{}:{}/burst", host, port))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        address: &str,
        mut body: serde_json::Value,
    ) -> Result<T, ProbeError> {
        let url = self.endpoint(address)?;
        body["protocol"] = json!(PROTOCOL);

        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        let value: serde_json::Value = response.json().await?;

        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            debug!("Peer {} refused {}: {}", address, body["requestType"], message);
            return Err(ProbeError::Peer(message));
        }

        serde_json::from_value(value).map_err(|e| ProbeError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn get_info(&self, address: &str) -> Result<PeerInfoResponse, ProbeError> {
        self.call(address, json!({ "requestType": "getInfo" })).await
    }

    async fn get_peers(&self, address: &str) -> Result<Vec<String>, ProbeError> {
        let response: PeersResponse = self.call(address, json!({ "requestType": "getPeers" })).await?;
        Ok(response.peers)
    }

    async fn get_cumulative_difficulty(
        &self,
        address: &str,
    ) -> Result<CumulativeDifficultyResponse, ProbeError> {
        self.call(address, json!({ "requestType": "getCumulativeDifficulty" }))
            .await
    }

    async fn get_next_block_ids(
        &self,
        address: &str,
        block_id: &str,
    ) -> Result<Vec<String>, ProbeError> {
        let response: NextBlockIdsResponse = self
            .call(
                address,
                json!({ "requestType": "getNextBlockIds", "blockId": block_id }),
            )
            .await?;
        Ok(response.next_block_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    /// Client pointed at the mock server, addressed as `127.0.0.1:<port>`
    fn client_for(server: &mockito::ServerGuard) -> (HttpPeerClient, String) {
        let address = server.host_with_port();
        (HttpPeerClient::new(reqwest::Client::new(), 8123), address)
    }

    #[test]
    fn test_endpoint_adds_default_port() {
        let client = HttpPeerClient::new(reqwest::Client::new(), 8123);

        assert_eq!(client.endpoint("1.2.3.4").unwrap(), "http://1.2.3.4:8123/burst");
        assert_eq!(client.endpoint("node.example:9000").unwrap(), "http://node.example:9000/burst");
        assert_eq!(client.endpoint("2001:db8::1").unwrap(), "http://[2001:db8::1]:8123/burst");
        assert_eq!(client.endpoint("[::1]:9000").unwrap(), "http://[::1]:9000/burst");
        assert!(client.endpoint("").is_err());
    }

    #[tokio::test]
    async fn test_get_info() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/burst")
            .match_body(Matcher::PartialJson(json!({
                "protocol": "B1",
                "requestType": "getInfo"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"announcedAddress":"p1.example:8123","application":"BRS","version":"v3.8.0","platform":"linux"}"#,
            )
            .create_async()
            .await;

        let (client, address) = client_for(&server);
        let info = client.get_info(&address).await.unwrap();

        assert_eq!(info.announced_address.as_deref(), Some("p1.example:8123"));
        assert_eq!(info.version, "v3.8.0");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_next_block_ids_sends_block_id() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/burst")
            .match_body(Matcher::PartialJson(json!({
                "requestType": "getNextBlockIds",
                "blockId": "444"
            })))
            .with_status(200)
            .with_body(r#"{"nextBlockIds":["555","556"]}"#)
            .create_async()
            .await;

        let (client, address) = client_for(&server);
        let ids = client.get_next_block_ids(&address, "444").await.unwrap();

        assert_eq!(ids, vec!["555".to_string(), "556".to_string()]);
    }

    #[tokio::test]
    async fn test_error_field_is_peer_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/burst")
            .with_status(200)
            .with_body(r#"{"error":"Blacklisted"}"#)
            .create_async()
            .await;

        let (client, address) = client_for(&server);
        match client.get_peers(&address).await {
            Err(ProbeError::Peer(message)) => assert_eq!(message, "Blacklisted"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/burst")
            .with_status(503)
            .create_async()
            .await;

        let (client, address) = client_for(&server);
        assert!(matches!(
            client.get_cumulative_difficulty(&address).await,
            Err(ProbeError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = HttpPeerClient::new(reqwest::Client::new(), 8123);
        // Port 1 on loopback is closed in test environments
        assert!(matches!(
            client.get_info("127.0.0.1:1").await,
            Err(ProbeError::Transport(_))
        ));
    }
}
