//! Room relay
//!
//! Relay nodes for multiplayer games whose peers cannot reach each other
//! directly, plus a load balancer that spreads clients across nodes.
//!
//! A relay node accepts game clients over a framed TCP transport, groups them
//! into rooms and forwards traffic through each room's host. Members only
//! ever talk to the host; the host addresses members one at a time.
//!
//! The load balancer admits nodes after probing them, evicts nodes that stop
//! answering, picks the least loaded node for a joining client and serves a
//! room list aggregated across the cluster.
//!
//! # Example
//!
//! ```no_run
//! use room_relay::{RelayConfig, RelayNode};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> room_relay::Result<()> {
//!     let config = RelayConfig::default().auth_key("my secret");
//!     let node = RelayNode::bind(config).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     node.run_until(shutdown).await
//! }
//! ```

pub mod balancer;
pub mod buffer;
pub mod compression;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod relay;
pub mod types;

pub use balancer::{BalancerConfig, LoadBalancer};
pub use error::{Error, ProtocolError, Result};
pub use relay::{RelayConfig, RelayNode};
pub use types::{Channel, ConnectionId, LoadBalancerStats, RelayAddress, RelayStats, Region, Room};
