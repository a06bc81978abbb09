//! Shared data model
//!
//! Types that travel between relay nodes, the load balancer and clients,
//! either over the relay wire protocol or as JSON over HTTP.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Connection id assigned by a relay node's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport channel a frame arrived on or is sent on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ordered, reliable delivery
    Reliable,
    /// Best-effort delivery
    Unreliable,
}

impl Channel {
    pub fn as_u8(self) -> u8 {
        match self {
            Channel::Reliable => 0,
            Channel::Unreliable => 1,
        }
    }

    /// Unknown channel numbers fall back to reliable delivery
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Channel::Unreliable,
            _ => Channel::Reliable,
        }
    }
}

/// Operator-defined locality tag
///
/// `Any` doubles as the aggregate bucket of the load balancer's room cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Region {
    #[default]
    Any = 0,
    NorthAmerica = 1,
    SouthAmerica = 2,
    Europe = 3,
    Asia = 4,
    Africa = 5,
    Oceania = 6,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::Any,
        Region::NorthAmerica,
        Region::SouthAmerica,
        Region::Europe,
        Region::Asia,
        Region::Africa,
        Region::Oceania,
    ];

    /// Parse a region from an `x-Region` header value.
    ///
    /// Returns `None` when the value is not an integer or not a known region.
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(|id| Region::try_from(id).ok())
    }
}

impl TryFrom<u8> for Region {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Region::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::Validation(format!("unknown region {}", value)))
    }
}

impl From<Region> for u8 {
    fn from(region: Region) -> u8 {
        region as u8
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Any => "any",
            Region::NorthAmerica => "north-america",
            Region::SouthAmerica => "south-america",
            Region::Europe => "europe",
            Region::Asia => "asia",
            Region::Africa => "africa",
            Region::Oceania => "oceania",
        };
        f.write_str(name)
    }
}

/// Identity of a relay node as known to the load balancer
///
/// `address` is what game clients connect to; `endpoint_address` is where the
/// load balancer reaches the node's HTTP endpoint. They differ when the node
/// announces a public address that is not routable from the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAddress {
    pub address: String,
    pub endpoint_address: String,
    pub game_port: u16,
    pub endpoint_port: u16,
    pub region: Region,
}

impl RelayAddress {
    /// Base URL of the node's HTTP endpoint
    pub fn endpoint_url(&self) -> String {
        format!("http://{}:{}", self.endpoint_address, self.endpoint_port)
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (endpoint {}:{}, {})",
            self.address, self.game_port, self.endpoint_address, self.endpoint_port, self.region
        )
    }
}

/// Point-in-time load snapshot of a relay node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub connected_clients: u32,
    pub room_count: u32,
    pub public_room_count: u32,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
}

/// Aggregate stats reported by the load balancer's `/api/stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStats {
    pub node_count: u32,
    pub connected_clients: u32,
    pub room_count: u32,
    pub public_room_count: u32,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
}

impl LoadBalancerStats {
    /// Sum node stats into load balancer totals, pinning at `u32::MAX`
    pub fn aggregate<'a>(nodes: impl IntoIterator<Item = &'a RelayStats>, uptime: Duration) -> Self {
        nodes.into_iter().fold(
            Self {
                uptime,
                ..Self::default()
            },
            |mut acc, stats| {
                acc.node_count = acc.node_count.saturating_add(1);
                acc.connected_clients = acc.connected_clients.saturating_add(stats.connected_clients);
                acc.room_count = acc.room_count.saturating_add(stats.room_count);
                acc.public_room_count = acc.public_room_count.saturating_add(stats.public_room_count);
                acc
            },
        )
    }
}

/// A game session hosted on one relay node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub server_id: String,
    pub host_id: ConnectionId,
    pub server_name: String,
    pub server_data: String,
    pub app_id: i32,
    pub region: Region,
    pub is_public: bool,
    /// Zero means unlimited
    pub max_players: i32,
    /// Members including the host
    pub clients: BTreeSet<ConnectionId>,
    /// Filled in by the load balancer when aggregating listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_info: Option<RelayAddress>,
}

impl Room {
    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.clients.contains(&id)
    }

    pub fn is_full(&self) -> bool {
        self.max_players > 0 && self.clients.len() >= self.max_players as usize
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
