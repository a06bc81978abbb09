//! Periodic health checks of registered relay nodes
//!
//! Every tick probes all nodes concurrently, each probe bounded by its own
//! timeout, so one dead node never delays the verdict on the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::RelayAddress;

use super::cache::ServerListCache;
use super::client::NodeClient;
use super::registry::NodeRegistry;

/// Outcome of one health tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub healthy: usize,
    pub evicted: Vec<RelayAddress>,
}

/// Background prober keeping the node registry honest
pub struct HealthMonitor<C: NodeClient> {
    registry: Arc<NodeRegistry>,
    client: Arc<C>,
    cache: Option<Arc<ServerListCache<C>>>,
    interval: Duration,
    probe_timeout: Duration,
}

impl<C: NodeClient> HealthMonitor<C> {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<C>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            cache: None,
            interval,
            probe_timeout,
        }
    }

    /// Refresh `cache` after any tick that evicted a node
    pub fn with_cache(mut self, cache: Arc<ServerListCache<C>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Probe every node once
    pub async fn tick(&self) -> TickReport {
        let snapshot = self.registry.snapshot().await;

        let probes = snapshot.iter().map(|(address, _)| async move {
            let result = tokio::time::timeout(self.probe_timeout, self.client.fetch_stats(address))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::NodeUnreachable {
                        node: address.to_string(),
                        reason: format!("no answer within {:?}", self.probe_timeout),
                    })
                });
            (address, result)
        });

        let mut report = TickReport::default();
        for (address, result) in join_all(probes).await {
            match result {
                Ok(stats) => {
                    self.registry.update(address, stats).await;
                    report.healthy += 1;
                }
                Err(e) => {
                    tracing::warn!(node = %address, error = %e, "Health probe failed");
                    if self.registry.evict(address).await {
                        report.evicted.push(address.clone());
                    }
                }
            }
        }

        tracing::debug!(
            healthy = report.healthy,
            evicted = report.evicted.len(),
            "Health check complete"
        );

        if !report.evicted.is_empty() {
            if let Some(cache) = &self.cache {
                cache.request_refresh();
            }
        }

        report
    }

    /// Tick every interval until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::debug!("Health monitor stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
