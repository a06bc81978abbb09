//! Aggregated room list cache
//!
//! Rebuilt from every registered node's room list and served pre-serialized,
//! per region and per app id. Rebuilds are coalesced:
//!
//! ```text
//!            request                 request
//!   Idle ─────────────▶ Running ─────────────▶ RunningWithPending
//!    ▲                    │  ▲                        │
//!    └────── done ────────┘  └────────── done ────────┘
//! ```
//!
//! At most one pass runs at a time, and any number of requests arriving
//! during a pass are served by exactly one follow-up pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::relay::id::generate_local;
use crate::types::{RelayAddress, Region, Room};

use super::client::NodeClient;
use super::registry::NodeRegistry;

const EMPTY_LIST: &str = "[]";

/// What a pass does when one node's room list cannot be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshFailurePolicy {
    /// Leave the node's rooms out and finish the pass
    #[default]
    SkipNode,
    /// Clear the cache, stop the pass and retry after a delay
    AbortPass,
}

/// Scheduling state of the cache rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Running,
    RunningWithPending,
}

impl RefreshState {
    /// State after a refresh request, and whether a pass must be started
    pub fn on_request(self) -> (Self, bool) {
        match self {
            RefreshState::Idle => (RefreshState::Running, true),
            RefreshState::Running | RefreshState::RunningWithPending => {
                (RefreshState::RunningWithPending, false)
            }
        }
    }

    /// State after a pass finished, and whether another pass must run
    pub fn on_complete(self) -> (Self, bool) {
        match self {
            RefreshState::RunningWithPending => (RefreshState::Running, true),
            RefreshState::Running | RefreshState::Idle => (RefreshState::Idle, false),
        }
    }
}

#[derive(Debug)]
enum PassOutcome {
    Completed,
    Aborted,
}

/// Serialized lists as of the last finished pass
#[derive(Debug, Default)]
struct CachedLists {
    regions: HashMap<Region, String>,
    apps: HashMap<Region, HashMap<i32, String>>,
    room_ids: HashSet<String>,
}

/// Rooms grouped during a pass, before serialization
#[derive(Debug, Default)]
struct Buckets {
    regions: HashMap<Region, Vec<Room>>,
    apps: HashMap<Region, HashMap<i32, Vec<Room>>>,
    room_ids: HashSet<String>,
}

impl Buckets {
    fn add(&mut self, node: &RelayAddress, rooms: Vec<Room>) {
        let mut targets = vec![Region::Any];
        if node.region != Region::Any {
            targets.push(node.region);
        }

        for mut room in rooms {
            room.relay_info = Some(node.clone());
            if !self.room_ids.insert(room.server_id.clone()) {
                tracing::debug!(room = %room.server_id, node = %node, "Room id listed by more than one node");
            }

            for region in &targets {
                self.regions.entry(*region).or_default().push(room.clone());
                self.apps
                    .entry(*region)
                    .or_default()
                    .entry(room.app_id)
                    .or_default()
                    .push(room.clone());
            }
        }
    }

    fn serialize(self) -> Result<CachedLists> {
        let mut lists = CachedLists {
            room_ids: self.room_ids,
            ..CachedLists::default()
        };

        for (region, rooms) in self.regions {
            lists.regions.insert(region, serde_json::to_string(&rooms)?);
        }
        for (region, apps) in self.apps {
            let serialized = lists.apps.entry(region).or_default();
            for (app_id, rooms) in apps {
                serialized.insert(app_id, serde_json::to_string(&rooms)?);
            }
        }

        Ok(lists)
    }
}

/// Region and app partitioned room lists of the whole cluster
pub struct ServerListCache<C: NodeClient> {
    registry: Arc<NodeRegistry>,
    client: Arc<C>,
    state: Mutex<RefreshState>,
    lists: RwLock<CachedLists>,
    runs: AtomicU64,
    policy: RefreshFailurePolicy,
    retry_delay: Duration,
    fetch_timeout: Duration,
    cancel: CancellationToken,
}

impl<C: NodeClient> ServerListCache<C> {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<C>,
        policy: RefreshFailurePolicy,
        fetch_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            state: Mutex::new(RefreshState::Idle),
            lists: RwLock::new(CachedLists::default()),
            runs: AtomicU64::new(0),
            policy,
            retry_delay,
            fetch_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop refreshes when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ask for a rebuild; coalesces with one already running
    pub fn request_refresh(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let start = self.transition(RefreshState::on_request);
        if start {
            let cache = Arc::clone(self);
            tokio::spawn(async move { cache.refresh_loop().await });
        } else {
            tracing::trace!("Refresh already running, coalesced");
        }
    }

    pub fn state(&self) -> RefreshState {
        *self.lock_state()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == RefreshState::Idle
    }

    /// Number of passes executed so far
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Stop scheduling passes; an in-flight pass is abandoned
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Serialized list of every room in `region` (`Any` = all regions)
    pub async fn room_list(&self, region: Region) -> String {
        self.lists
            .read()
            .await
            .regions
            .get(&region)
            .cloned()
            .unwrap_or_else(|| EMPTY_LIST.to_string())
    }

    /// Serialized list of one app's rooms in `region`
    pub async fn app_room_list(&self, region: Region, app_id: i32) -> String {
        self.lists
            .read()
            .await
            .apps
            .get(&region)
            .and_then(|apps| apps.get(&app_id))
            .cloned()
            .unwrap_or_else(|| EMPTY_LIST.to_string())
    }

    /// Draw a room id not used by any room in the last finished pass
    pub async fn generate_room_id(&self, length: usize) -> Result<String> {
        let lists = self.lists.read().await;
        generate_local(length, |candidate| lists.room_ids.contains(candidate))
    }

    async fn refresh_loop(self: Arc<Self>) {
        loop {
            self.runs.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.transition(|_| (RefreshState::Idle, false));
                    return;
                }
                outcome = self.refresh_pass() => outcome,
            };

            if let PassOutcome::Aborted = outcome {
                // Retry even if nobody asks again
                self.transition(RefreshState::on_request);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.transition(|_| (RefreshState::Idle, false));
                        return;
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }

            if !self.transition(RefreshState::on_complete) {
                return;
            }
            tracing::debug!("Running coalesced refresh");
        }
    }

    async fn refresh_pass(&self) -> PassOutcome {
        let nodes = self.registry.snapshot().await;
        tracing::debug!(nodes = nodes.len(), "Refreshing server list");

        let mut buckets = Buckets::default();
        for (address, _) in &nodes {
            let fetched = match tokio::time::timeout(
                self.fetch_timeout,
                self.client.fetch_rooms(address),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::NodeUnreachable {
                    node: address.to_string(),
                    reason: format!("no answer within {:?}", self.fetch_timeout),
                }),
            };

            match fetched {
                Ok(rooms) => buckets.add(address, rooms),
                Err(e) => match self.policy {
                    RefreshFailurePolicy::SkipNode => {
                        tracing::warn!(node = %address, error = %e, "Skipping node in server list refresh");
                    }
                    RefreshFailurePolicy::AbortPass => {
                        tracing::warn!(node = %address, error = %e, "Server list refresh aborted");
                        *self.lists.write().await = CachedLists::default();
                        return PassOutcome::Aborted;
                    }
                },
            }
        }

        match buckets.serialize() {
            Ok(lists) => {
                let rooms = lists.room_ids.len();
                *self.lists.write().await = lists;
                tracing::debug!(rooms = rooms, "Server list refreshed");
                PassOutcome::Completed
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server list");
                PassOutcome::Aborted
            }
        }
    }

    /// Apply `step` to the state; returns its "start a pass" flag
    fn transition(&self, step: impl FnOnce(RefreshState) -> (RefreshState, bool)) -> bool {
        let mut state = self.lock_state();
        let (next, run) = step(*state);
        *state = next;
        run
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
