//! Node registry
//!
//! The set of keys is the cluster membership as the load balancer sees it.
//! A node gets in only through a successful admission probe and stays only
//! while health probes keep succeeding.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{RelayAddress, RelayStats};

use super::client::NodeClient;

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    stats: RelayStats,
    /// Admission order, so snapshots iterate in a stable order
    seq: u64,
}

#[derive(Debug, Default)]
struct Nodes {
    entries: HashMap<RelayAddress, NodeEntry>,
    next_seq: u64,
}

impl Nodes {
    fn upsert(&mut self, address: RelayAddress, stats: RelayStats) {
        match self.entries.get_mut(&address) {
            Some(entry) => entry.stats = stats,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(address, NodeEntry { stats, seq });
            }
        }
    }
}

/// Registry of relay nodes, shared by request handlers and the health loop
///
/// Thread-safe via `RwLock`; every method holds the lock only for the map
/// operation itself, never across a network call.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Nodes>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe a candidate and add it if the probe succeeds.
    ///
    /// Returns the stats the probe reported. A failed probe leaves the
    /// registry untouched.
    pub async fn admit<C: NodeClient>(
        &self,
        client: &C,
        address: RelayAddress,
        timeout: Duration,
    ) -> Result<RelayStats> {
        let probe = tokio::time::timeout(timeout, client.fetch_stats(&address)).await;

        let stats = match probe {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                return Err(Error::ProbeFailed {
                    node: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::ProbeFailed {
                    node: address.to_string(),
                    reason: format!("no answer within {:?}", timeout),
                })
            }
        };

        tracing::info!(
            node = %address,
            connected_clients = stats.connected_clients,
            rooms = stats.room_count,
            "Relay node admitted"
        );

        self.nodes.write().await.upsert(address, stats);
        Ok(stats)
    }

    /// Point-in-time copy of every node, in admission order
    pub async fn snapshot(&self) -> Vec<(RelayAddress, RelayStats)> {
        let nodes = self.nodes.read().await;

        let mut entries: Vec<_> = nodes
            .entries
            .iter()
            .map(|(address, entry)| (entry.seq, address.clone(), entry.stats))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);

        entries
            .into_iter()
            .map(|(_, address, stats)| (address, stats))
            .collect()
    }

    /// Replace a node's stats, inserting it if absent
    pub async fn update(&self, address: &RelayAddress, stats: RelayStats) {
        self.nodes.write().await.upsert(address.clone(), stats);
    }

    /// Remove a node. Returns false if it was not registered.
    pub async fn evict(&self, address: &RelayAddress) -> bool {
        let removed = self.nodes.write().await.entries.remove(address).is_some();
        if removed {
            tracing::info!(node = %address, "Relay node evicted");
        }
        removed
    }

    pub async fn get(&self, address: &RelayAddress) -> Option<RelayStats> {
        self.nodes
            .read()
            .await
            .entries
            .get(address)
            .map(|entry| entry.stats)
    }

    pub async fn contains(&self, address: &RelayAddress) -> bool {
        self.nodes.read().await.entries.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
