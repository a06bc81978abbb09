//! Relay node configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, load_or_create};
use crate::error::Result;
use crate::types::Region;

/// Relay node configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// Key game clients must present before doing anything else
    pub auth_key: String,

    /// Interface both listeners bind to
    pub bind_address: IpAddr,

    /// Port of the game transport
    pub transport_port: u16,

    /// Port of the HTTP endpoint
    pub endpoint_port: u16,

    /// Serve the HTTP endpoint at all
    pub use_endpoint: bool,

    /// Serve the room listing routes (403 otherwise)
    pub endpoint_server_list: bool,

    /// Address announced to the load balancer; `None` lets it use the
    /// address the registration came from
    pub public_address: Option<String>,

    /// Register with a load balancer and take room ids from it
    pub use_load_balancer: bool,

    pub load_balancer_auth_key: String,

    pub load_balancer_address: String,

    pub load_balancer_port: u16,

    pub region: Region,

    /// Length of locally generated room ids
    pub room_id_length: usize,

    /// Largest payload a client may relay
    pub max_packet_size: usize,

    /// Number of pooled send buffers
    pub buffer_pool_slots: usize,

    /// Timeout of calls to the load balancer
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_key: "Secret Auth Key".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            transport_port: 7777,
            endpoint_port: 8080,
            use_endpoint: true,
            endpoint_server_list: true,
            public_address: None,
            use_load_balancer: false,
            load_balancer_auth_key: "AuthKey".to_string(),
            load_balancer_address: "127.0.0.1".to_string(),
            load_balancer_port: 7070,
            region: Region::Any,
            room_id_length: 5,
            max_packet_size: 16 * 1024,
            buffer_pool_slots: 50,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Load from a JSON file, writing defaults there if it is missing
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        load_or_create(path.as_ref())
    }

    /// Set the client auth key
    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Set the bind interface
    pub fn bind(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set both listener ports; 0 picks a free port
    pub fn ports(mut self, transport_port: u16, endpoint_port: u16) -> Self {
        self.transport_port = transport_port;
        self.endpoint_port = endpoint_port;
        self
    }

    /// Register with the load balancer at `address:port`
    pub fn load_balancer(mut self, address: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        self.use_load_balancer = true;
        self.load_balancer_address = address.into();
        self.load_balancer_port = port;
        self.load_balancer_auth_key = key.into();
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Disable the HTTP endpoint
    pub fn disable_endpoint(mut self) -> Self {
        self.use_endpoint = false;
        self
    }

    /// Hide the room listing routes
    pub fn hide_server_list(mut self) -> Self {
        self.endpoint_server_list = false;
        self
    }

    pub fn transport_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.transport_port)
    }

    pub fn endpoint_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.endpoint_port)
    }
}
