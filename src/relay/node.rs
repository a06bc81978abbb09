//! Relay node process
//!
//! Binds the game transport and the HTTP endpoint, registers with the load
//! balancer when configured, then runs until the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::protocol::DATA_FRAME_OVERHEAD;

use super::balancer_link::{LoadBalancerLink, NodeAnnouncement};
use super::config::RelayConfig;
use super::endpoint::{self, EndpointState};
use super::id::IdGenerator;
use super::listing::RelayListing;
use super::room::RoomRegistry;
use super::router::RelayRouter;
use super::transport::TcpTransport;

/// Headroom over `max_packet_size` for control frames with long strings
const CONTROL_FRAME_HEADROOM: usize = 1024;

/// Transport event queue depth
const EVENT_QUEUE: usize = 1024;

/// A bound, not yet running relay node
pub struct RelayNode {
    config: RelayConfig,
    transport_listener: TcpListener,
    endpoint_listener: Option<TcpListener>,
    listing: Arc<RelayListing>,
}

impl RelayNode {
    /// Bind the listeners named in `config`
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let transport_listener = TcpListener::bind(config.transport_addr()).await?;
        let endpoint_listener = if config.use_endpoint {
            Some(TcpListener::bind(config.endpoint_addr()).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            transport_listener,
            endpoint_listener,
            listing: Arc::new(RelayListing::new()),
        })
    }

    /// Address the game transport is listening on
    pub fn transport_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport_listener.local_addr()?)
    }

    /// Address the HTTP endpoint is listening on, if enabled
    pub fn endpoint_addr(&self) -> Result<Option<SocketAddr>> {
        match &self.endpoint_listener {
            Some(listener) => Ok(Some(listener.local_addr()?)),
            None => Ok(None),
        }
    }

    pub fn listing(&self) -> &Arc<RelayListing> {
        &self.listing
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Fails early if registering with the load balancer fails.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let config = self.config;
        let transport_addr = self.transport_listener.local_addr()?;
        let endpoint_addr = match &self.endpoint_listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };
        let cancel = shutdown.child_token();

        let link = config.use_load_balancer.then(|| {
            LoadBalancerLink::new(
                &config.load_balancer_address,
                config.load_balancer_port,
                config.load_balancer_auth_key.clone(),
                config.request_timeout,
            )
        });

        let ids = match &link {
            Some(link) => IdGenerator::delegated(link.clone()),
            None => IdGenerator::local(config.room_id_length),
        };

        let transport = Arc::new(TcpTransport::new(
            config.max_packet_size + CONTROL_FRAME_HEADROOM,
        ));
        let pool = Arc::new(BufferPool::new(
            config.buffer_pool_slots,
            config.max_packet_size + DATA_FRAME_OVERHEAD,
        ));

        let mut tasks = Vec::new();

        let (publisher, publisher_task) = self.listing.spawn_publisher(cancel.clone());
        tasks.push(publisher_task);

        let mut router = RelayRouter::new(
            transport.clone(),
            RoomRegistry::new(config.region),
            pool,
            ids,
            config.auth_key.clone(),
            config.max_packet_size,
        )
        .with_listing(self.listing.clone())
        .with_listing_publisher(publisher);
        if let Some(link) = &link {
            let (notifier, notifier_task) = link.spawn_notifier(cancel.clone());
            tasks.push(notifier_task);
            router = router.with_room_change_notifier(notifier);
        }

        if let Some(listener) = self.endpoint_listener {
            let app = endpoint::router(EndpointState {
                listing: self.listing.clone(),
                server_list_enabled: config.endpoint_server_list,
            });
            let stop = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
                {
                    tracing::error!(error = %e, "Relay endpoint failed");
                }
            }));
            tracing::info!(addr = ?endpoint_addr, "Relay endpoint listening");
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        tasks.push(tokio::spawn(router.run(events_rx, cancel.clone())));
        tasks.push(tokio::spawn(transport.run(
            self.transport_listener,
            events_tx,
            cancel.clone(),
        )));
        tracing::info!(
            addr = %transport_addr,
            region = %config.region,
            "Relay transport listening"
        );

        // The load balancer probes our endpoint while admitting us
        if let Some(link) = &link {
            let announcement = NodeAnnouncement {
                game_port: transport_addr.port(),
                endpoint_port: endpoint_addr.map(|addr| addr.port()).unwrap_or(config.endpoint_port),
                public_address: config.public_address.clone().unwrap_or_default(),
                region: config.region,
            };
            if let Err(e) = link.authenticate(&announcement).await {
                tracing::error!(
                    load_balancer = %link.base_url(),
                    error = %e,
                    "Failed to register with load balancer"
                );
                cancel.cancel();
                futures::future::join_all(tasks).await;
                return Err(e);
            }
        }

        cancel.cancelled().await;
        tracing::info!("Shutdown signal received");

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Relay task ended abnormally");
            }
        }

        Ok(())
    }
}
