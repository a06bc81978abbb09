//! Relay node's side of the load balancer protocol
//!
//! A node registers itself once at startup (`/api/auth`), tells the load
//! balancer whenever its rooms change (`/api/roomsupdated`) and, when ids are
//! delegated, asks it for fresh room ids (`/api/get/id`).
//!
//! Room change notifications go through a single [`RoomChangeNotifier`] task.
//! Changes arriving while a call is in flight collapse into one follow-up
//! call, so a busy node never has more than one notification outstanding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpFailure};
use crate::types::Region;

/// How the node describes itself when registering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAnnouncement {
    pub game_port: u16,
    pub endpoint_port: u16,
    /// Address clients should use; empty lets the load balancer use the
    /// address the registration came from
    pub public_address: String,
    pub region: Region,
}

/// Client for the load balancer's HTTP API
#[derive(Debug, Clone)]
pub struct LoadBalancerLink {
    http: HttpClient,
    base_url: String,
    auth_key: String,
}

impl LoadBalancerLink {
    pub fn new(address: &str, port: u16, auth_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(timeout),
            base_url: format!("http://{}:{}", address, port),
            auth_key: auth_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register this node with the load balancer
    pub async fn authenticate(&self, announcement: &NodeAnnouncement) -> Result<()> {
        let headers = vec![
            ("Authorization", self.auth_key.clone()),
            ("x-EndpointPort", announcement.endpoint_port.to_string()),
            ("x-GamePort", announcement.game_port.to_string()),
            ("x-PIP", announcement.public_address.clone()),
            ("x-Region", u8::from(announcement.region).to_string()),
        ];

        self.get("/api/auth", headers).await?;
        tracing::info!(
            load_balancer = %self.base_url,
            region = %announcement.region,
            "Registered with load balancer"
        );
        Ok(())
    }

    /// Tell the load balancer this node's room list changed
    pub async fn rooms_updated(&self) -> Result<()> {
        self.get(
            "/api/roomsupdated",
            vec![("Authorization", self.auth_key.clone())],
        )
        .await
        .map(|_| ())
    }

    /// Start the task that reports room changes, one call at a time
    pub fn spawn_notifier(&self, cancel: CancellationToken) -> (RoomChangeNotifier, JoinHandle<()>) {
        let pending = Arc::new(Notify::new());
        let notifier = RoomChangeNotifier {
            pending: pending.clone(),
        };
        let link = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = pending.notified() => {}
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = link.rooms_updated() => result,
                };
                if let Err(e) = result {
                    tracing::warn!(
                        load_balancer = %link.base_url,
                        error = %e,
                        "Failed to notify load balancer of room change"
                    );
                }
            }
            tracing::debug!("Room change notifier stopped");
        });

        (notifier, handle)
    }

    /// Ask the load balancer for a cluster-unique room id
    pub async fn request_id(&self) -> Result<String> {
        let body = self.get("/api/get/id", Vec::new()).await?;
        Ok(body.replace("\\r", "").replace("\\n", "").trim().to_string())
    }

    async fn get(&self, path: &str, headers: Vec<(&'static str, String)>) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);

        self.http
            .get_text(url, headers)
            .await
            .map_err(|failure| match failure {
                HttpFailure::Status(403) => Error::Auth,
                other => Error::Http(format!("{} {}: {}", self.base_url, path, other)),
            })
    }
}

/// Handle for flagging that this node's rooms changed
#[derive(Debug, Clone)]
pub struct RoomChangeNotifier {
    pending: Arc<Notify>,
}

impl RoomChangeNotifier {
    /// Schedule a notification; repeated calls before it is sent coalesce
    pub fn notify(&self) {
        self.pending.notify_one();
    }
}
