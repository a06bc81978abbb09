//! Load balancer's view of a relay node's HTTP endpoint
//!
//! Admission, health checks and cache refreshes all talk to nodes through
//! [`NodeClient`], so each can be tested against an in-memory fake.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::{RelayAddress, RelayStats, Room};

/// Calls the load balancer makes on relay nodes
pub trait NodeClient: Send + Sync + 'static {
    /// Fetch the node's `/api/stats`
    fn fetch_stats(&self, node: &RelayAddress) -> impl Future<Output = Result<RelayStats>> + Send;

    /// Fetch the node's public room list
    fn fetch_rooms(&self, node: &RelayAddress) -> impl Future<Output = Result<Vec<Room>>> + Send;
}

/// [`NodeClient`] over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    http: HttpClient,
}

impl HttpNodeClient {
    /// Create a client whose every call is bounded by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(timeout),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, node: &RelayAddress, path: &str) -> Result<T> {
        let url = format!("{}{}", node.endpoint_url(), path);
        let body = self
            .http
            .get_text(url, Vec::new())
            .await
            .map_err(|failure| Error::NodeUnreachable {
                node: node.to_string(),
                reason: failure.to_string(),
            })?;

        serde_json::from_str(&body).map_err(|e| Error::NodeUnreachable {
            node: node.to_string(),
            reason: format!("malformed response from {}: {}", path, e),
        })
    }
}

impl NodeClient for HttpNodeClient {
    async fn fetch_stats(&self, node: &RelayAddress) -> Result<RelayStats> {
        self.get_json(node, "/api/stats").await
    }

    async fn fetch_rooms(&self, node: &RelayAddress) -> Result<Vec<Room>> {
        self.get_json(node, "/api/servers").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Region;

    #[tokio::test]
    async fn test_unreachable_node() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let node = RelayAddress {
            address: "127.0.0.1".into(),
            endpoint_address: "127.0.0.1".into(),
            game_port: 7777,
            endpoint_port: port,
            region: Region::Any,
        };

        let client = HttpNodeClient::new(Duration::from_secs(1));
        assert!(matches!(
            client.fetch_stats(&node).await,
            Err(Error::NodeUnreachable { .. })
        ));
    }
}
