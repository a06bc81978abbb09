//! Load balancer control plane
//!
//! Relay nodes register here after passing a probe of their stats endpoint.
//! The balancer then keeps the roster healthy, steers joining clients to the
//! least loaded node, and serves a cluster-wide room list.
//!
//! ```text
//!   relay ── /api/auth ──► NodeRegistry ◄── HealthMonitor (tick)
//!   relay ── /api/roomsupdated ──┐              │ eviction
//!                                ▼              ▼
//!                        ServerListCache::request_refresh
//!                                │  Idle → Running → RunningWithPending
//!                                ▼
//!   client ── /api/masterlist ◄── region / app buckets
//!   client ── /api/join ◄── select_node(snapshot, region)
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod health;
pub mod registry;
pub mod selection;
pub mod server;

pub use cache::{RefreshFailurePolicy, RefreshState, ServerListCache};
pub use client::{HttpNodeClient, NodeClient};
pub use config::BalancerConfig;
pub use endpoint::BalancerState;
pub use health::{HealthMonitor, TickReport};
pub use registry::NodeRegistry;
pub use selection::select_node;
pub use server::LoadBalancer;
