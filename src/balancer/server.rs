//! Load balancer process
//!
//! Wires the node registry, the server list cache and the health monitor to
//! the HTTP surface, then serves until the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::cache::ServerListCache;
use super::client::{HttpNodeClient, NodeClient};
use super::config::BalancerConfig;
use super::endpoint::{self, BalancerState};
use super::health::HealthMonitor;
use super::registry::NodeRegistry;

/// A bound, not yet running load balancer
pub struct LoadBalancer<C: NodeClient = HttpNodeClient> {
    config: BalancerConfig,
    listener: TcpListener,
    registry: Arc<NodeRegistry>,
    client: Arc<C>,
    cache: Arc<ServerListCache<C>>,
    cancel: CancellationToken,
}

impl LoadBalancer<HttpNodeClient> {
    /// Bind the endpoint named in `config`, talking to nodes over HTTP
    pub async fn bind(config: BalancerConfig) -> Result<Self> {
        let client = HttpNodeClient::new(config.probe_timeout);
        Self::bind_with_client(config, client).await
    }
}

impl<C: NodeClient> LoadBalancer<C> {
    pub async fn bind_with_client(config: BalancerConfig, client: C) -> Result<Self> {
        let listener = TcpListener::bind(config.endpoint_addr()).await?;
        let registry = Arc::new(NodeRegistry::new());
        let client = Arc::new(client);
        let cancel = CancellationToken::new();

        let cache = Arc::new(
            ServerListCache::new(
                registry.clone(),
                client.clone(),
                config.refresh_failure_policy,
                config.probe_timeout,
                config.refresh_retry_delay,
            )
            .with_cancellation(cancel.clone()),
        );

        Ok(Self {
            config,
            listener,
            registry,
            client,
            cache,
            cancel,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ServerListCache<C>> {
        &self.cache
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.listener.local_addr()?;
        let cancel = self.cancel;

        // Parent shutdown also stops the cache and the health monitor
        let forward = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let health = HealthMonitor::new(
            self.registry.clone(),
            self.client.clone(),
            self.config.health_check_interval,
            self.config.probe_timeout,
        )
        .with_cache(self.cache.clone())
        .spawn(cancel.clone());

        let app = endpoint::router(Arc::new(BalancerState {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            client: self.client.clone(),
            auth_key: self.config.auth_key.clone(),
            probe_timeout: self.config.probe_timeout,
            room_id_length: self.config.room_id_length,
            started_at: Instant::now(),
        }));

        tracing::info!(
            addr = %addr,
            health_interval = ?self.config.health_check_interval,
            policy = ?self.config.refresh_failure_policy,
            "Load balancer listening"
        );

        let served = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

        cancel.cancel();
        tracing::info!("Load balancer shutting down");

        if let Err(e) = health.await {
            tracing::warn!(error = %e, "Health monitor ended abnormally");
        }
        if let Err(e) = forward.await {
            tracing::warn!(error = %e, "Shutdown forwarder ended abnormally");
        }

        served?;
        Ok(())
    }
}
