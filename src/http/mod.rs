//! HTTP plumbing shared by relay nodes and the load balancer
//!
//! Outbound calls go through a blocking `ureq` agent moved onto the blocking
//! thread pool; inbound routes are `axum` routers built by each side.

pub mod client;
pub mod response;

pub use client::{HttpClient, HttpFailure};
