//! Relay node
//!
//! A relay node accepts game clients, groups them into rooms and forwards
//! their traffic through each room's host.

pub mod balancer_link;
pub mod config;
pub mod endpoint;
pub mod id;
pub mod listing;
pub mod node;
pub mod room;
pub mod router;
pub mod transport;

pub use balancer_link::{LoadBalancerLink, NodeAnnouncement, RoomChangeNotifier};
pub use config::RelayConfig;
pub use id::IdGenerator;
pub use listing::{ListingPublisher, RelayListing, RoomSnapshot};
pub use node::RelayNode;
pub use room::{Departure, RoomRegistry, RoomSettings};
pub use router::RelayRouter;
pub use transport::{RelayEvent, TcpTransport, Transport};
