//! Published room listing of a relay node
//!
//! The router owns the room table; after every mutation it captures a
//! [`RoomSnapshot`] and hands it to a publisher task, which serializes and
//! compresses it here. HTTP handlers only ever read the last published
//! listing, so they never contend with the relay path for the room table.
//!
//! The hand-off is a watch channel: snapshots submitted while the publisher
//! is busy replace each other, and only the newest one is serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::compression::compress_listing;
use crate::error::Result;
use crate::types::{RelayStats, Room};

use super::room::RoomRegistry;

/// Serialized listing for one filter (all apps, or a single app id)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingBody {
    pub json: String,
    pub compressed: String,
}

impl ListingBody {
    fn from_rooms(rooms: &[&Room]) -> Result<Self> {
        let json = serde_json::to_string(rooms)?;
        let compressed = compress_listing(&json);
        Ok(Self { json, compressed })
    }

    fn empty() -> Self {
        Self {
            json: "[]".to_string(),
            compressed: compress_listing("[]"),
        }
    }
}

/// Public rooms and the room count, copied out of the router's table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    public: Vec<Room>,
    room_count: u32,
}

impl RoomSnapshot {
    pub fn capture(rooms: &RoomRegistry) -> Self {
        Self {
            public: rooms.rooms().filter(|room| room.is_public).cloned().collect(),
            room_count: rooms.len() as u32,
        }
    }
}

/// Router's end of the publisher task
#[derive(Debug)]
pub struct ListingPublisher {
    tx: watch::Sender<Arc<RoomSnapshot>>,
}

impl ListingPublisher {
    /// Queue `snapshot` for publication, replacing any not yet published
    pub fn submit(&self, snapshot: RoomSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }
}

#[derive(Debug)]
struct Snapshot {
    all: ListingBody,
    by_app: HashMap<i32, ListingBody>,
    room_count: u32,
    public_room_count: u32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            all: ListingBody::empty(),
            by_app: HashMap::new(),
            room_count: 0,
            public_room_count: 0,
        }
    }
}

/// Last published state of a node's rooms plus its live counters
#[derive(Debug)]
pub struct RelayListing {
    snapshot: RwLock<Snapshot>,
    connected: AtomicU32,
    started_at: Instant,
}

impl RelayListing {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            connected: AtomicU32::new(0),
            started_at: Instant::now(),
        }
    }

    /// Rebuild the published listing from the room table in place.
    ///
    /// Only public rooms are listed; private rooms still count towards
    /// `room_count`.
    pub async fn publish(&self, rooms: &RoomRegistry) -> Result<()> {
        self.apply(&RoomSnapshot::capture(rooms)).await
    }

    /// Serialize `snapshot` and make it the published listing
    pub async fn apply(&self, snapshot: &RoomSnapshot) -> Result<()> {
        let public: Vec<&Room> = snapshot.public.iter().collect();

        let mut per_app: HashMap<i32, Vec<&Room>> = HashMap::new();
        for room in public.iter().copied() {
            per_app.entry(room.app_id).or_default().push(room);
        }

        let mut by_app = HashMap::with_capacity(per_app.len());
        for (app_id, app_rooms) in per_app {
            by_app.insert(app_id, ListingBody::from_rooms(&app_rooms)?);
        }

        let next = Snapshot {
            all: ListingBody::from_rooms(&public)?,
            by_app,
            room_count: snapshot.room_count,
            public_room_count: public.len() as u32,
        };

        *self.snapshot.write().await = next;
        Ok(())
    }

    /// Start the task that publishes submitted snapshots until `cancel` fires
    pub fn spawn_publisher(self: &Arc<Self>, cancel: CancellationToken) -> (ListingPublisher, JoinHandle<()>) {
        let (tx, mut rx) = watch::channel(Arc::new(RoomSnapshot::default()));
        let listing = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let snapshot = rx.borrow_and_update().clone();
                if let Err(e) = listing.apply(&snapshot).await {
                    tracing::error!(error = %e, "Failed to publish room listing");
                }
            }
            tracing::debug!("Listing publisher stopped");
        });

        (ListingPublisher { tx }, handle)
    }

    /// Listing of every public room, or of one app's public rooms
    pub async fn listing(&self, app_id: Option<i32>) -> ListingBody {
        let snapshot = self.snapshot.read().await;
        match app_id {
            None => snapshot.all.clone(),
            Some(app_id) => snapshot
                .by_app
                .get(&app_id)
                .cloned()
                .unwrap_or_else(ListingBody::empty),
        }
    }

    pub fn set_connected(&self, count: u32) {
        self.connected.store(count, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> RelayStats {
        let snapshot = self.snapshot.read().await;
        RelayStats {
            connected_clients: self.connected.load(Ordering::Relaxed),
            room_count: snapshot.room_count,
            public_room_count: snapshot.public_room_count,
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayListing {
    fn default() -> Self {
        Self::new()
    }
}
